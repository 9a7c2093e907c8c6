use serde::{Deserialize, Serialize};

use crate::error::LabError;

/// Participant identity chosen at the gate. Each identity maps to one
/// fixed persona prompt. Serialized as the participant number (1 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Identity {
    ParticipantA,
    ParticipantB,
}

const PROMPT_A: &str = "请你严格遵守以下限制：
1. 仅回答用户当前明确提出的问题，不主动提供额外建议或提问
2. 避免包含\"是否需要更多帮助？\"等引导性语句
3. 禁止添加任何表情符号
4. 使用正式书面语气，禁止拟人化行为和第一人称代词";

const PROMPT_B: &str = "请你严格遵守以下限制：
1. 每次回答后主动提出3个与当前任务相关的后续问题
2. 用户问题模糊时，必须请求澄清
3. 每段回答后添加1个相关表情符号（如💡、🤔等）
4. 使用第一人称（如\"我建议\"）和口语化语气
5. 每次回答需包含对用户的积极认可（如\"很好的问题！\"）";

impl Identity {
    pub const ALL: [Identity; 2] = [Identity::ParticipantA, Identity::ParticipantB];

    /// The participant number shown in the UI and written to snapshots.
    pub fn number(self) -> u8 {
        match self {
            Identity::ParticipantA => 1,
            Identity::ParticipantB => 2,
        }
    }

    pub fn from_number(n: u8) -> Result<Self, LabError> {
        Identity::ALL
            .into_iter()
            .find(|id| id.number() == n)
            .ok_or_else(|| LabError::validation("please choose a valid identity (1 or 2)"))
    }

    /// Instruction text prepended to every outbound request for this
    /// participant.
    pub fn persona_prompt(self) -> &'static str {
        match self {
            Identity::ParticipantA => PROMPT_A,
            Identity::ParticipantB => PROMPT_B,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl From<Identity> for u8 {
    fn from(identity: Identity) -> u8 {
        identity.number()
    }
}

impl TryFrom<u8> for Identity {
    type Error = LabError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Identity::from_number(n)
    }
}
