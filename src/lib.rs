pub mod cli;
pub mod client;
pub mod config;
pub mod duration;
pub mod error;
pub mod export;
pub mod notes;
pub mod persona;
pub mod providers;
pub mod session;
pub mod store;
pub mod web;

pub use client::{ChatBackend, HttpChatBackend};
pub use config::LabConfig;
pub use duration::format_duration;
pub use error::LabError;
pub use persona::Identity;
pub use providers::{ChatMessage, Role};
pub use session::{SessionState, SessionView, TurnOutcome};
