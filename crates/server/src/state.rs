use std::sync::Arc;

use wallstream_content_store::ContentStore;

use crate::guard::PublishGuard;
use crate::principal::UserDirectory;
use crate::repository::{
    DeviceRepository, MemoryDeviceRepository, MemoryWallpaperRepository, WallpaperRepository,
};
use crate::state_store::{MemoryStateStore, PublisherStateStore};

/// Runtime settings the router needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Prefix for published file URLs. Empty yields server-relative URLs.
    pub public_url: String,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            public_url: String::new(),
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<UserDirectory>,
    pub devices: Arc<dyn DeviceRepository>,
    pub states: Arc<dyn PublisherStateStore>,
    pub guard: Arc<PublishGuard>,
    pub uploads: ContentStore,
}

impl AppState {
    /// State over caller-supplied repositories.
    pub fn new(
        config: AppConfig,
        users: UserDirectory,
        uploads: ContentStore,
        devices: Arc<dyn DeviceRepository>,
        wallpapers: Arc<dyn WallpaperRepository>,
        states: Arc<dyn PublisherStateStore>,
    ) -> Self {
        let guard = Arc::new(PublishGuard::new(
            devices.clone(),
            wallpapers,
            states.clone(),
        ));
        Self {
            config: Arc::new(config),
            users: Arc::new(users),
            devices,
            states,
            guard,
            uploads,
        }
    }

    /// State over the in-memory repositories.
    pub fn in_memory(config: AppConfig, users: UserDirectory, uploads: ContentStore) -> Self {
        Self::new(
            config,
            users,
            uploads,
            Arc::new(MemoryDeviceRepository::default()),
            Arc::new(MemoryWallpaperRepository::default()),
            Arc::new(MemoryStateStore::default()),
        )
    }

    /// Public URL of an uploaded file.
    pub fn file_url(&self, filename: &str) -> String {
        format!(
            "{}/files/{filename}",
            self.config.public_url.trim_end_matches('/')
        )
    }
}
