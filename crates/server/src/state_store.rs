//! Current descriptor per publisher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::RwLock;
use wallstream_protocol::PublisherStateDescriptor;

use crate::repository::RepoFuture;

/// Key-value store of each publisher's current wallpaper.
///
/// Writes to one key are serialized; different keys never contend.
pub trait PublisherStateStore: Send + Sync {
    fn get<'a>(&'a self, publisher_id: &'a str)
    -> RepoFuture<'a, Option<PublisherStateDescriptor>>;

    fn put<'a>(
        &'a self,
        publisher_id: &'a str,
        descriptor: PublisherStateDescriptor,
    ) -> RepoFuture<'a, ()>;

    /// Clears the entry if it still points at `hash`. Returns whether it did.
    fn clear_if<'a>(&'a self, publisher_id: &'a str, hash: &'a str) -> RepoFuture<'a, bool>;
}

type Slot = Arc<RwLock<Option<PublisherStateDescriptor>>>;

/// In-memory [`PublisherStateStore`] with one lock per publisher.
#[derive(Default)]
pub struct MemoryStateStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryStateStore {
    fn slot(&self, publisher_id: &str) -> Option<Slot> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(publisher_id).cloned()
    }

    /// Only writes create slots, so lookups of unknown IDs stay free.
    fn slot_or_insert(&self, publisher_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(publisher_id.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl PublisherStateStore for MemoryStateStore {
    fn get<'a>(
        &'a self,
        publisher_id: &'a str,
    ) -> RepoFuture<'a, Option<PublisherStateDescriptor>> {
        let slot = self.slot(publisher_id);
        Box::pin(async move {
            match slot {
                Some(slot) => Ok(slot.read().await.clone()),
                None => Ok(None),
            }
        })
    }

    fn put<'a>(
        &'a self,
        publisher_id: &'a str,
        descriptor: PublisherStateDescriptor,
    ) -> RepoFuture<'a, ()> {
        let slot = self.slot_or_insert(publisher_id);
        Box::pin(async move {
            *slot.write().await = Some(descriptor);
            Ok(())
        })
    }

    fn clear_if<'a>(&'a self, publisher_id: &'a str, hash: &'a str) -> RepoFuture<'a, bool> {
        let slot = self.slot(publisher_id);
        Box::pin(async move {
            let Some(slot) = slot else {
                return Ok(false);
            };
            let mut current = slot.write().await;
            if current.as_ref().is_some_and(|d| d.hash == hash) {
                *current = None;
                return Ok(true);
            }
            Ok(false)
        })
    }
}
