//! Notes panel: the bound free-text field, the snapshot written on submit and
//! the one-shot survey redirect.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::duration::format_duration;
use crate::error::LabError;
use crate::session::SessionState;

pub const NOTES_FILE_NAME: &str = "research_notes.txt";

impl SessionState {
    /// Bind the notes field. Called on every edit, before any submit.
    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
    }

    /// Fire the pending redirect, if any. Returns the survey URL exactly once
    /// per successful submission.
    pub fn take_redirect(&mut self, survey_url: &str) -> Option<String> {
        if std::mem::take(&mut self.should_redirect) {
            Some(survey_url.to_string())
        } else {
            None
        }
    }
}

pub fn render_snapshot(state: &SessionState, notes: &str, now: DateTime<Local>) -> String {
    let identity = state
        .identity
        .map(|id| id.to_string())
        .unwrap_or_else(|| "未确认".to_string());
    format!(
        "实验时间：{}\n用户ID：{}\n总时长：{}\n净时长：{}\n\n观察记录：\n{}",
        now.format("%Y-%m-%d %H:%M:%S"),
        identity,
        format_duration(state.total_duration_secs),
        format_duration(state.net_duration_secs),
        notes
    )
}

/// Validate and persist `notes`, overwriting the previous snapshot in `dir`,
/// then arm the redirect.
pub fn submit_notes(
    state: &mut SessionState,
    notes: &str,
    dir: &Path,
    now: DateTime<Local>,
) -> Result<PathBuf, LabError> {
    if notes.trim().is_empty() {
        return Err(LabError::validation("please fill in your notes first"));
    }
    state.set_notes(notes);
    let path = dir.join(NOTES_FILE_NAME);
    std::fs::write(&path, render_snapshot(state, notes, now))?;
    state.should_redirect = true;
    info!(path = %path.display(), "notes snapshot saved");
    Ok(path)
}
