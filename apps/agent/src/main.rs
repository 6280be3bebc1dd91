//! Wallstream agent entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Role;

#[derive(Debug, Parser)]
#[command(name = "wallstream-agent", version, about = "Publish or follow a desktop wallpaper")]
struct Cli {
    /// Configuration file (defaults to the per-user config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured role.
    #[arg(long, value_enum)]
    role: Option<Role>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting Wallstream agent"
    );

    let path = cli.config.unwrap_or_else(config::default_config_path);
    let mut config = config::Config::load(&path)?;
    if let Some(role) = cli.role {
        config.role = role;
    }
    config.validate()?;
    tracing::info!(
        path = %path.display(),
        role = %config.role,
        device_id = %config.device_id,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}
