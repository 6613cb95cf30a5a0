//! Persistence capability used by the operation log, dispatcher, tombstone
//! registry and reconciler.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::model::{EntityId, GoogleResourceLink, ResourceType};
use crate::sync::types::{QueueRecord, SyncStats};

use super::PersistError;

/// Durable local storage. Every write returns a `Result`; callers decide how
/// to surface failures instead of relying on panics.
pub trait SyncStore: Send + Sync {
    fn load_queue(&self) -> Result<Vec<QueueRecord>, PersistError>;

    /// Replace the persisted queue with `records`, in order.
    fn save_queue(&self, records: &[QueueRecord]) -> Result<(), PersistError>;

    fn load_stats(&self) -> Result<Option<SyncStats>, PersistError>;

    fn save_stats(&self, stats: &SyncStats) -> Result<(), PersistError>;

    fn load_tombstones(&self) -> Result<BTreeSet<EntityId>, PersistError>;

    fn save_tombstones(&self, ids: &BTreeSet<EntityId>) -> Result<(), PersistError>;

    fn load_links(&self) -> Result<Vec<GoogleResourceLink>, PersistError>;

    fn save_link(&self, link: &GoogleResourceLink) -> Result<(), PersistError>;

    fn delete_link(&self, local_id: &str, resource_type: ResourceType) -> Result<(), PersistError>;

    fn kv_get(&self, key: &str) -> Result<Option<String>, PersistError>;

    /// `None` removes the key.
    fn kv_set(&self, key: &str, value: Option<&str>) -> Result<(), PersistError>;
}

#[derive(Default)]
struct MemoryInner {
    queue: Vec<QueueRecord>,
    stats: Option<SyncStats>,
    tombstones: BTreeSet<EntityId>,
    links: HashMap<(EntityId, ResourceType), GoogleResourceLink>,
    kv: HashMap<String, String>,
}

/// Non-durable store for tests and throwaway sessions.
///
/// Can be switched into a "full" mode where every write fails with
/// [`PersistError::CapacityExceeded`], and can fail link writes on their own.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    full: AtomicBool,
    fail_link_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::SeqCst);
    }

    pub fn set_link_writes_failing(&self, failing: bool) {
        self.fail_link_writes.store(failing, Ordering::SeqCst);
    }

    fn check_capacity(&self) -> Result<(), PersistError> {
        if self.full.load(Ordering::SeqCst) {
            return Err(PersistError::CapacityExceeded("memory store marked full".into()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, PersistError> {
        self.inner
            .lock()
            .map_err(|_| PersistError::Storage("memory store lock poisoned".into()))
    }
}

impl SyncStore for MemoryStore {
    fn load_queue(&self) -> Result<Vec<QueueRecord>, PersistError> {
        Ok(self.lock()?.queue.clone())
    }

    fn save_queue(&self, records: &[QueueRecord]) -> Result<(), PersistError> {
        self.check_capacity()?;
        self.lock()?.queue = records.to_vec();
        Ok(())
    }

    fn load_stats(&self) -> Result<Option<SyncStats>, PersistError> {
        Ok(self.lock()?.stats.clone())
    }

    fn save_stats(&self, stats: &SyncStats) -> Result<(), PersistError> {
        self.check_capacity()?;
        self.lock()?.stats = Some(stats.clone());
        Ok(())
    }

    fn load_tombstones(&self) -> Result<BTreeSet<EntityId>, PersistError> {
        Ok(self.lock()?.tombstones.clone())
    }

    fn save_tombstones(&self, ids: &BTreeSet<EntityId>) -> Result<(), PersistError> {
        self.check_capacity()?;
        self.lock()?.tombstones = ids.clone();
        Ok(())
    }

    fn load_links(&self) -> Result<Vec<GoogleResourceLink>, PersistError> {
        Ok(self.lock()?.links.values().cloned().collect())
    }

    fn save_link(&self, link: &GoogleResourceLink) -> Result<(), PersistError> {
        self.check_capacity()?;
        if self.fail_link_writes.load(Ordering::SeqCst) {
            return Err(PersistError::Storage("link write rejected".into()));
        }
        self.lock()?
            .links
            .insert((link.local_id.clone(), link.resource_type), link.clone());
        Ok(())
    }

    fn delete_link(&self, local_id: &str, resource_type: ResourceType) -> Result<(), PersistError> {
        self.lock()?.links.remove(&(local_id.to_string(), resource_type));
        Ok(())
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.lock()?.kv.get(key).cloned())
    }

    fn kv_set(&self, key: &str, value: Option<&str>) -> Result<(), PersistError> {
        self.check_capacity()?;
        let mut inner = self.lock()?;
        match value {
            Some(v) => {
                inner.kv.insert(key.to_string(), v.to_string());
            }
            None => {
                inner.kv.remove(key);
            }
        }
        Ok(())
    }
}
