//! Wires the cache, state file, platform backend and network into a sync engine.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wallstream_content_store::ContentStore;
use wallstream_sync::{HttpRemote, HttpUploader, Mode, StateManager, SyncEngine, Uploader};

use crate::config::{Config, Role};

/// Runs the agent until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = match &config.cache_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            ContentStore::new(dir)
        }
        None => ContentStore::open_default()?,
    };
    tracing::info!(
        root = %store.root().display(),
        size_bytes = store.size_bytes(),
        "cache ready"
    );

    let states = StateManager::new(store.root())?;
    let mode = build_mode(&config)?;
    let wallpaper = wallstream_platform::detect();
    let engine = SyncEngine::new(mode, store, states, wallpaper)?;

    let cancel = CancellationToken::new();
    let interval = Duration::from_secs(config.poll_interval_secs);
    let handle = tokio::spawn(engine.run(interval, cancel.clone()));

    tracing::info!(role = %config.role, server = %config.server_url, "agent ready");

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("SIGINT received, shutting down"),
        Err(e) => tracing::error!(error = %e, "cannot listen for SIGINT, shutting down"),
    }

    cancel.cancel();
    handle.await?;
    Ok(())
}

fn build_mode(config: &Config) -> anyhow::Result<Mode> {
    let timeout = Duration::from_secs(config.http_timeout_secs);

    let mode = match config.role {
        Role::Subscriber => Mode::Subscriber {
            publisher_id: config.publisher_id.clone(),
            remote: Arc::new(HttpRemote::new(&config.server_url, timeout)?),
        },
        Role::Publisher => {
            let uploader: Option<Arc<dyn Uploader>> = if config.upload_enabled() {
                Some(Arc::new(HttpUploader::new(
                    &config.server_url,
                    &config.device_id,
                    &config.username,
                    &config.api_key,
                    timeout,
                )?))
            } else {
                tracing::warn!("no upload credentials configured, changes stay in the local cache");
                None
            };
            Mode::Publisher { uploader }
        }
    };
    Ok(mode)
}
