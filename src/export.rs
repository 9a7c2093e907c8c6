use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::duration::format_duration;
use crate::error::LabError;
use crate::providers::Role;
use crate::session::SessionState;

pub const TRANSCRIPT_FILE_NAME: &str = "dialogue_record.txt";
pub const TRANSCRIPT_HEADING: &str = "实验对话记录";

/// A rendered transcript that has been written to disk.
#[derive(Debug, Clone)]
pub struct ExportedTranscript {
    pub path: PathBuf,
    pub file_name: &'static str,
    pub body: String,
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "用户",
        Role::Assistant | Role::System => "AI助手",
    }
}

/// Render the transcript document: heading, formatted durations, then one
/// `<label>：<content>` line per visible message.
pub fn render_transcript(state: &SessionState) -> String {
    let mut doc = String::new();
    doc.push_str(TRANSCRIPT_HEADING);
    doc.push_str("\n\n");
    doc.push_str(&format!("实验总时长：{}\n", format_duration(state.total_duration_secs)));
    doc.push_str(&format!("净交流时长：{}\n\n", format_duration(state.net_duration_secs)));
    for msg in state.visible_transcript() {
        doc.push_str(&format!("{}：{}\n", role_label(msg.role), msg.content));
    }
    doc
}

/// Write the transcript document into `dir`, replacing any earlier export.
pub fn export_transcript(state: &SessionState, dir: &Path) -> Result<ExportedTranscript, LabError> {
    if state.transcript.is_empty() {
        warn!("export requested with an empty transcript");
        return Err(LabError::ExportPrecondition);
    }
    let body = render_transcript(state);
    let path = dir.join(TRANSCRIPT_FILE_NAME);
    std::fs::write(&path, &body)?;
    info!(path = %path.display(), bytes = body.len(), "transcript exported");
    Ok(ExportedTranscript { path, file_name: TRANSCRIPT_FILE_NAME, body })
}
