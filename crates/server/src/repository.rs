//! Persistence seams for devices and published wallpapers.
//!
//! Both repositories are plain CRUD; uniqueness of `(device_id, hash)` is
//! enforced by [`crate::guard::PublishGuard`], not here.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;
use wallstream_protocol::{PublishedWallpaper, PublisherDevice};

/// Errors from a repository backend.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Boxed future returned by repository methods.
pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepoError>> + Send + 'a>>;

pub trait WallpaperRepository: Send + Sync {
    fn create(&self, record: PublishedWallpaper) -> RepoFuture<'_, PublishedWallpaper>;

    /// All records of `device_id`, oldest first.
    fn list_by_device<'a>(&'a self, device_id: &'a str) -> RepoFuture<'a, Vec<PublishedWallpaper>>;

    /// Removes the record `(device_id, hash)`. Returns `false` if absent.
    fn delete<'a>(&'a self, device_id: &'a str, hash: &'a str) -> RepoFuture<'a, bool>;
}

pub trait DeviceRepository: Send + Sync {
    /// Registers a device. Fails with [`RepoError::AlreadyExists`] if the ID is taken.
    fn create(&self, device: PublisherDevice) -> RepoFuture<'_, PublisherDevice>;

    fn get<'a>(&'a self, device_id: &'a str) -> RepoFuture<'a, Option<PublisherDevice>>;

    fn list_by_user<'a>(&'a self, user_id: &'a str) -> RepoFuture<'a, Vec<PublisherDevice>>;
}

/// In-memory [`WallpaperRepository`].
#[derive(Default)]
pub struct MemoryWallpaperRepository {
    records: RwLock<Vec<PublishedWallpaper>>,
}

impl WallpaperRepository for MemoryWallpaperRepository {
    fn create(&self, record: PublishedWallpaper) -> RepoFuture<'_, PublishedWallpaper> {
        Box::pin(async move {
            self.records.write().await.push(record.clone());
            Ok(record)
        })
    }

    fn list_by_device<'a>(&'a self, device_id: &'a str) -> RepoFuture<'a, Vec<PublishedWallpaper>> {
        Box::pin(async move {
            let records = self.records.read().await;
            Ok(records
                .iter()
                .filter(|r| r.device_id == device_id)
                .cloned()
                .collect())
        })
    }

    fn delete<'a>(&'a self, device_id: &'a str, hash: &'a str) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|r| !(r.device_id == device_id && r.hash == hash));
            Ok(records.len() != before)
        })
    }
}

/// In-memory [`DeviceRepository`] keyed by device ID.
#[derive(Default)]
pub struct MemoryDeviceRepository {
    devices: RwLock<HashMap<String, PublisherDevice>>,
}

impl DeviceRepository for MemoryDeviceRepository {
    fn create(&self, device: PublisherDevice) -> RepoFuture<'_, PublisherDevice> {
        Box::pin(async move {
            match self.devices.write().await.entry(device.device_id.clone()) {
                Entry::Occupied(_) => Err(RepoError::AlreadyExists(format!(
                    "device {}",
                    device.device_id
                ))),
                Entry::Vacant(slot) => Ok(slot.insert(device).clone()),
            }
        })
    }

    fn get<'a>(&'a self, device_id: &'a str) -> RepoFuture<'a, Option<PublisherDevice>> {
        Box::pin(async move { Ok(self.devices.read().await.get(device_id).cloned()) })
    }

    fn list_by_user<'a>(&'a self, user_id: &'a str) -> RepoFuture<'a, Vec<PublisherDevice>> {
        Box::pin(async move {
            let devices = self.devices.read().await;
            let mut owned: Vec<_> = devices
                .values()
                .filter(|d| d.user_id == user_id)
                .cloned()
                .collect();
            owned.sort_by(|a, b| a.device_id.cmp(&b.device_id));
            Ok(owned)
        })
    }
}
