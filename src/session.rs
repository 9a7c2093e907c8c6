//! Per-participant session state: the identity gate, the chat turn loop and
//! the timing counters it maintains.
//!
//! ## Timing
//! - `total_duration_secs` spans from the first user message to the latest
//!   assistant reply.
//! - `net_duration_secs` is that span minus the summed API latency. It is not
//!   clamped; a negative value renders as zero through `format_duration`.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use crate::client::ChatBackend;
use crate::duration::format_duration;
use crate::error::LabError;
use crate::persona::Identity;
use crate::providers::{ChatMessage, Role};

/// Prefix of the assistant placeholder written when a call fails.
pub const FAILURE_PREFIX: &str = "⚠️ 请求失败：";

/// Mutable record for one participant session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// `None` until the participant picks a radio option.
    pub identity: Option<Identity>,
    pub identity_confirmed: bool,
    /// User and assistant messages only; system prompts are never stored.
    pub transcript: Vec<ChatMessage>,
    pub user_timestamps: Vec<DateTime<Local>>,
    pub ai_timestamps: Vec<DateTime<Local>>,
    pub total_api_latency_secs: f64,
    pub total_duration_secs: f64,
    pub net_duration_secs: f64,
    pub notes: String,
    pub should_redirect: bool,
}

/// Result of one completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub latency_secs: f64,
    pub failed: bool,
}

/// Read-only projection rendered by the page.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub identity: Option<Identity>,
    pub identity_confirmed: bool,
    pub transcript: Vec<ChatMessage>,
    pub turns: usize,
    pub net_duration: String,
    pub total_duration: String,
    pub notes: String,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Identity gate
    // -----------------------------------------------------------------------

    /// Record a radio selection. Picking a different identity withdraws any
    /// earlier confirmation.
    pub fn select_identity(&mut self, identity: Identity) {
        if self.identity != Some(identity) {
            self.identity = Some(identity);
            self.identity_confirmed = false;
        }
    }

    /// Confirm participant `selected` (1 or 2) and start a fresh transcript.
    pub fn confirm_identity(&mut self, selected: u8) -> Result<Identity, LabError> {
        let identity = Identity::from_number(selected)?;
        self.identity = Some(identity);
        self.identity_confirmed = true;
        self.transcript.clear();
        info!(identity = %identity, "identity confirmed");
        Ok(identity)
    }

    /// The confirmed identity, or the blocking notice as an error.
    pub fn confirmed_identity(&self) -> Result<Identity, LabError> {
        match (self.identity_confirmed, self.identity) {
            (true, Some(identity)) => Ok(identity),
            _ => Err(LabError::IdentityNotConfirmed),
        }
    }

    // -----------------------------------------------------------------------
    // Chat turn
    // -----------------------------------------------------------------------

    /// Outbound payload: the persona prompt followed by the last `window`
    /// transcript entries, oldest first.
    pub fn prompt_window(&self, identity: Identity, window: usize) -> Vec<ChatMessage> {
        let start = self.transcript.len().saturating_sub(window);
        std::iter::once(ChatMessage::system(identity.persona_prompt()))
            .chain(self.transcript[start..].iter().cloned())
            .collect()
    }

    /// Run one turn: record the user message, ask `backend` for a reply,
    /// record the reply and refresh the timing counters.
    ///
    /// Empty input is a no-op and returns `Ok(None)`. A failed call never
    /// returns an error; it becomes a placeholder reply with zero latency.
    pub async fn submit_user_message(
        &mut self,
        text: &str,
        backend: &dyn ChatBackend,
        context_window: usize,
    ) -> Result<Option<TurnOutcome>, LabError> {
        let identity = self.confirmed_identity()?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        self.user_timestamps.push(Local::now());
        self.transcript.push(ChatMessage::user(text));

        let payload = self.prompt_window(identity, context_window);
        let started = Instant::now();
        let (reply, latency_secs, failed) = match backend.complete(payload).await {
            Ok(reply) => (reply, started.elapsed().as_secs_f64(), false),
            Err(e) => {
                warn!(error = %e, "chat request failed");
                (format!("{}{}", FAILURE_PREFIX, e), 0.0, true)
            }
        };

        self.transcript.push(ChatMessage::assistant(reply.clone()));
        self.ai_timestamps.push(Local::now());
        self.total_api_latency_secs += latency_secs;
        self.recompute_durations();

        info!(
            turn = self.ai_timestamps.len(),
            latency_secs,
            failed,
            "turn complete"
        );
        Ok(Some(TurnOutcome { reply, latency_secs, failed }))
    }

    fn recompute_durations(&mut self) {
        if let (Some(first_user), Some(last_ai)) =
            (self.user_timestamps.first(), self.ai_timestamps.last())
        {
            let span = *last_ai - *first_user;
            self.total_duration_secs = span.num_milliseconds() as f64 / 1000.0;
            self.net_duration_secs = self.total_duration_secs - self.total_api_latency_secs;
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Messages the participant sees (everything except system prompts).
    pub fn visible_transcript(&self) -> impl Iterator<Item = &ChatMessage> {
        self.transcript.iter().filter(|m| m.role != Role::System)
    }

    /// Completed turns, counted by assistant replies.
    pub fn turn_count(&self) -> usize {
        self.ai_timestamps.len()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            identity: self.identity,
            identity_confirmed: self.identity_confirmed,
            transcript: self.visible_transcript().cloned().collect(),
            turns: self.turn_count(),
            net_duration: format_duration(self.net_duration_secs),
            total_duration: if self.total_duration_secs > 0.0 {
                format_duration(self.total_duration_secs)
            } else {
                "N/A".to_string()
            },
            notes: self.notes.clone(),
        }
    }
}
