use clap::Parser;
use colored::*;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use persona_lab::cli::Args;
use persona_lab::web::{self, AppContext};
use persona_lab::{HttpChatBackend, LabConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("persona_lab=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // A missing .env is fine; the variable may be exported directly.
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = LabConfig::resolve(&args)?;

    let api_key = config.api_key();
    if api_key.is_none() {
        warn!(variable = %config.api_key_env, "API key not set; every chat turn will fail");
        eprintln!(
            "{}",
            format!("  {} not set. Export it or add it to a .env file.", config.api_key_env)
                .bright_red()
        );
    }

    std::fs::create_dir_all(&config.output_dir)?;
    let backend = HttpChatBackend::new(&config, api_key)?;
    info!(model = backend.model(), endpoint = %config.endpoint, "chat backend ready");
    let ctx = AppContext::new(config, Arc::new(backend));
    web::serve(ctx, !args.no_browser).await?;

    Ok(())
}
