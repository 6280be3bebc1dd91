use wallstream_content_store::ContentStore;
use wallstream_server::principal::UserDirectory;
use wallstream_server::state::{AppConfig, AppState};

use crate::config::Config;

/// Serves the API until Ctrl-C, then drains in-flight requests.
pub async fn run(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.upload_dir)?;
    let uploads = ContentStore::new(&config.upload_dir);
    tracing::info!(
        upload_dir = %config.upload_dir.display(),
        size_bytes = uploads.size_bytes(),
        "upload store ready"
    );

    let users = UserDirectory::new(config.users);
    if users.is_empty() {
        tracing::warn!("no users configured, every authenticated request will be rejected");
    }

    let state = AppState::in_memory(
        AppConfig {
            public_url: config.public_url,
            max_upload_bytes: config.max_upload_bytes,
        },
        users,
        uploads,
    );

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, wallstream_server::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
    tracing::info!("SIGINT received, shutting down");
}
