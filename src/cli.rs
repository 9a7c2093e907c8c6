use clap::Parser;
use std::path::PathBuf;

/// Flags left unset fall back to the config file, then to built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "persona-lab")]
#[command(version)]
#[command(about = "Persona-assigned LLM chat sessions for psychology experiments")]
pub struct Args {
    /// Path to a TOML config file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Port for the local web form
    #[arg(long)]
    pub port: Option<u16>,

    /// Chat-completions endpoint URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Model name sent with every request (e.g. deepseek-chat)
    #[arg(long)]
    pub model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Number of recent transcript entries sent as context
    #[arg(long)]
    pub context_window: Option<usize>,

    /// Request timeout for the chat API, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Survey URL opened after notes are submitted
    #[arg(long)]
    pub survey_url: Option<String>,

    /// Directory for the notes snapshot and transcript document
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Do not open the browser at startup
    #[arg(long)]
    pub no_browser: bool,
}
