//! At-most-once publishing per `(device_id, hash)`.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;
use wallstream_content_store::is_valid_digest;
use wallstream_protocol::{
    PublishedWallpaper, PublisherDevice, PublisherStateDescriptor, unix_timestamp,
};

use crate::keyed::KeyedLocks;
use crate::principal::Principal;
use crate::repository::{DeviceRepository, RepoError, WallpaperRepository};
use crate::state_store::PublisherStateStore;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("wallpaper already published")]
    Duplicate,

    #[error("device {0} is not registered")]
    UnknownDevice(String),

    #[error("device {0} belongs to another user")]
    NotOwner(String),

    #[error("invalid content hash {0:?}")]
    InvalidHash(String),

    #[error("wallpaper not published")]
    NotPublished,

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Serializes publishes per device and rejects content the device already published.
///
/// A successful publish also becomes the device's current descriptor, which
/// is what subscribers poll.
pub struct PublishGuard {
    devices: Arc<dyn DeviceRepository>,
    wallpapers: Arc<dyn WallpaperRepository>,
    states: Arc<dyn PublisherStateStore>,
    locks: KeyedLocks,
}

impl PublishGuard {
    pub fn new(
        devices: Arc<dyn DeviceRepository>,
        wallpapers: Arc<dyn WallpaperRepository>,
        states: Arc<dyn PublisherStateStore>,
    ) -> Self {
        Self {
            devices,
            wallpapers,
            states,
            locks: KeyedLocks::default(),
        }
    }

    /// Returns the device if it exists and belongs to `principal`.
    pub async fn authorize(
        &self,
        principal: &Principal,
        device_id: &str,
    ) -> Result<PublisherDevice, PublishError> {
        let device = self
            .devices
            .get(device_id)
            .await?
            .ok_or_else(|| PublishError::UnknownDevice(device_id.to_string()))?;
        if device.user_id != principal.user_id {
            return Err(PublishError::NotOwner(device_id.to_string()));
        }
        Ok(device)
    }

    /// Records `hash` as published by `device_id`, served from `url`.
    ///
    /// Returns [`PublishError::Duplicate`] without inserting if the device
    /// already published this content. The duplicate still becomes the
    /// device's current descriptor, so switching back to an earlier
    /// wallpaper reaches subscribers.
    pub async fn publish(
        &self,
        principal: &Principal,
        device_id: &str,
        hash: &str,
        url: &str,
    ) -> Result<PublishedWallpaper, PublishError> {
        let hash = hash.to_ascii_lowercase();
        if !is_valid_digest(&hash) {
            return Err(PublishError::InvalidHash(hash));
        }
        self.authorize(principal, device_id).await?;

        let _lock = self.locks.lock(device_id).await;
        let now = unix_timestamp();

        let existing = self.wallpapers.list_by_device(device_id).await?;
        if let Some(record) = existing.iter().find(|r| r.hash == hash) {
            debug!(device_id, %hash, "duplicate publish rejected");
            self.point_state_at(device_id, &record.hash, &record.url, now)
                .await?;
            return Err(PublishError::Duplicate);
        }

        let record = self
            .wallpapers
            .create(PublishedWallpaper {
                id: Uuid::new_v4().to_string(),
                user_id: principal.user_id.clone(),
                device_id: device_id.to_string(),
                hash: hash.clone(),
                url: url.to_string(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.point_state_at(device_id, &hash, url, now).await?;

        info!(device_id, %hash, user = %principal.username, "wallpaper published");
        Ok(record)
    }

    /// Lists what `device_id` has published.
    pub async fn records(
        &self,
        principal: &Principal,
        device_id: &str,
    ) -> Result<Vec<PublishedWallpaper>, PublishError> {
        self.authorize(principal, device_id).await?;
        Ok(self.wallpapers.list_by_device(device_id).await?)
    }

    /// Deletes the record `(device_id, hash)` so the content can be published again.
    ///
    /// If it was the device's current wallpaper the descriptor is cleared too.
    pub async fn retract(
        &self,
        principal: &Principal,
        device_id: &str,
        hash: &str,
    ) -> Result<(), PublishError> {
        let hash = hash.to_ascii_lowercase();
        self.authorize(principal, device_id).await?;

        let _lock = self.locks.lock(device_id).await;
        if !self.wallpapers.delete(device_id, &hash).await? {
            return Err(PublishError::NotPublished);
        }
        if self.states.clear_if(device_id, &hash).await? {
            debug!(device_id, %hash, "current descriptor cleared");
        }

        info!(device_id, %hash, "wallpaper retracted");
        Ok(())
    }

    async fn point_state_at(
        &self,
        device_id: &str,
        hash: &str,
        url: &str,
        timestamp: i64,
    ) -> Result<(), PublishError> {
        if let Some(current) = self.states.get(device_id).await? {
            if current.hash == hash {
                return Ok(());
            }
        }
        self.states
            .put(
                device_id,
                PublisherStateDescriptor {
                    hash: hash.to_string(),
                    url: url.to_string(),
                    timestamp,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryDeviceRepository, MemoryWallpaperRepository};
    use crate::state_store::MemoryStateStore;
    use wallstream_content_store::hash_bytes;

    struct Fixture {
        guard: Arc<PublishGuard>,
        wallpapers: Arc<MemoryWallpaperRepository>,
        states: Arc<MemoryStateStore>,
    }

    fn alice() -> Principal {
        Principal {
            user_id: "u1".into(),
            username: "alice".into(),
        }
    }

    fn bob() -> Principal {
        Principal {
            user_id: "u2".into(),
            username: "bob".into(),
        }
    }

    async fn fixture() -> Fixture {
        let devices = Arc::new(MemoryDeviceRepository::default());
        devices
            .create(PublisherDevice {
                id: "d1".into(),
                user_id: "u1".into(),
                device_id: "desk".into(),
                created_at: 0,
                updated_at: 0,
            })
            .await
            .unwrap();
        let wallpapers = Arc::new(MemoryWallpaperRepository::default());
        let states = Arc::new(MemoryStateStore::default());
        let guard = Arc::new(PublishGuard::new(devices, wallpapers.clone(), states.clone()));
        Fixture {
            guard,
            wallpapers,
            states,
        }
    }

    fn url(hash: &str) -> String {
        format!("/files/{hash}.jpg")
    }

    #[tokio::test]
    async fn first_publish_creates_record_and_descriptor() {
        let fx = fixture().await;
        let h = hash_bytes(b"photo1");

        let record = fx.guard.publish(&alice(), "desk", &h, &url(&h)).await.unwrap();
        assert_eq!(record.hash, h);
        assert_eq!(record.user_id, "u1");
        assert!(uuid::Uuid::parse_str(&record.id).is_ok());

        let state = fx.states.get("desk").await.unwrap().unwrap();
        assert_eq!(state.hash, h);
        assert_eq!(state.url, url(&h));
    }

    #[tokio::test]
    async fn duplicate_is_rejected_without_second_record() {
        let fx = fixture().await;
        let h = hash_bytes(b"photo1");
        fx.guard.publish(&alice(), "desk", &h, &url(&h)).await.unwrap();

        let err = fx
            .guard
            .publish(&alice(), "desk", &h.to_uppercase(), &url(&h))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Duplicate));
        assert_eq!(fx.wallpapers.list_by_device("desk").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_of_older_wallpaper_becomes_current_again() {
        let fx = fixture().await;
        let h1 = hash_bytes(b"photo1");
        let h2 = hash_bytes(b"photo2");
        fx.guard.publish(&alice(), "desk", &h1, &url(&h1)).await.unwrap();
        fx.guard.publish(&alice(), "desk", &h2, &url(&h2)).await.unwrap();

        let err = fx
            .guard
            .publish(&alice(), "desk", &h1, &url(&h1))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Duplicate));
        assert_eq!(fx.states.get("desk").await.unwrap().unwrap().hash, h1);
        assert_eq!(fx.wallpapers.list_by_device("desk").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_identical_publishes_insert_once() {
        let fx = fixture().await;
        let h = hash_bytes(b"race");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = fx.guard.clone();
                let h = h.clone();
                tokio::spawn(async move { guard.publish(&alice(), "desk", &h, &url(&h)).await })
            })
            .collect();

        let mut ok = 0;
        let mut dup = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(PublishError::Duplicate) => dup += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((ok, dup), (1, 15));
        assert_eq!(fx.wallpapers.list_by_device("desk").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_unknown_foreign_and_malformed() {
        let fx = fixture().await;
        let h = hash_bytes(b"x");

        assert!(matches!(
            fx.guard.publish(&alice(), "laptop", &h, &url(&h)).await,
            Err(PublishError::UnknownDevice(_))
        ));
        assert!(matches!(
            fx.guard.publish(&bob(), "desk", &h, &url(&h)).await,
            Err(PublishError::NotOwner(_))
        ));
        assert!(matches!(
            fx.guard.publish(&alice(), "desk", "abc", "/files/abc.jpg").await,
            Err(PublishError::InvalidHash(_))
        ));
        assert!(fx.wallpapers.list_by_device("desk").await.unwrap().is_empty());
        assert!(fx.states.get("desk").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retract_allows_republish() {
        let fx = fixture().await;
        let h = hash_bytes(b"photo1");
        fx.guard.publish(&alice(), "desk", &h, &url(&h)).await.unwrap();

        fx.guard.retract(&alice(), "desk", &h).await.unwrap();
        assert!(fx.states.get("desk").await.unwrap().is_none());
        assert!(matches!(
            fx.guard.retract(&alice(), "desk", &h).await,
            Err(PublishError::NotPublished)
        ));

        fx.guard.publish(&alice(), "desk", &h, &url(&h)).await.unwrap();
        assert_eq!(fx.guard.records(&alice(), "desk").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_require_ownership() {
        let fx = fixture().await;
        assert!(matches!(
            fx.guard.records(&bob(), "desk").await,
            Err(PublishError::NotOwner(_))
        ));
    }
}
