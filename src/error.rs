//! Crate-level error type.
//!
//! Every failure in a session is absorbed where it happens and shown to the
//! participant; `kind()` gives the short label the web layer puts in JSON
//! error bodies.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabError {
    /// Empty or out-of-range input to a gate or form.
    #[error("{0}")]
    Validation(String),

    /// A chat operation was attempted before the identity gate was passed.
    #[error("please select your participant identity and confirm it first")]
    IdentityNotConfirmed,

    /// Network, HTTP status or decoding failure on the chat-completion call.
    #[error("{0}")]
    ExternalCall(String),

    /// Export requested with nothing to export.
    #[error("there is no conversation to export")]
    ExportPrecondition,

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LabError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::ExternalCall(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stable short label for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            LabError::Validation(_) => "validation",
            LabError::IdentityNotConfirmed => "identity_not_confirmed",
            LabError::ExternalCall(_) => "external_call",
            LabError::ExportPrecondition => "export_precondition",
            LabError::Config(_) => "config",
            LabError::Io(_) => "io",
            LabError::Serialization(_) => "serialization",
        }
    }

    /// HTTP status the web layer answers with for this error.
    pub fn status(&self) -> u16 {
        match self {
            LabError::Validation(_) | LabError::Config(_) | LabError::Serialization(_) => 400,
            LabError::IdentityNotConfirmed => 403,
            LabError::ExportPrecondition => 409,
            LabError::ExternalCall(_) => 502,
            LabError::Io(_) => 500,
        }
    }
}

impl From<reqwest::Error> for LabError {
    fn from(e: reqwest::Error) -> Self {
        LabError::ExternalCall(e.to_string())
    }
}

impl From<toml::de::Error> for LabError {
    fn from(e: toml::de::Error) -> Self {
        LabError::Config(e.to_string())
    }
}
