//! Registry of hard-deleted ids that stale remote reads must not resurrect.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::model::EntityId;
use crate::storage::{PersistError, SyncStore};

pub struct TombstoneRegistry {
    ids: BTreeSet<EntityId>,
    store: Arc<dyn SyncStore>,
}

impl TombstoneRegistry {
    /// # Errors
    /// Returns an error if the persisted set cannot be read.
    pub fn open(store: Arc<dyn SyncStore>) -> Result<Self, PersistError> {
        let ids = store.load_tombstones()?;
        Ok(Self { ids, store })
    }

    pub fn add<I, S>(&mut self, ids: I) -> Result<(), PersistError>
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        let before = self.ids.len();
        self.ids.extend(ids.into_iter().map(Into::into));
        if self.ids.len() == before {
            return Ok(());
        }
        self.store.save_tombstones(&self.ids)
    }

    pub fn has(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Forget `id`, e.g. when it is restored.
    pub fn remove(&mut self, id: &str) -> Result<bool, PersistError> {
        if !self.ids.remove(id) {
            return Ok(false);
        }
        self.store.save_tombstones(&self.ids)?;
        Ok(true)
    }

    /// Keep a tombstone only while the remote still reports the id. Returns
    /// the ids whose deletion is now confirmed.
    pub fn prune<'a, I>(&mut self, known_remote_ids: I) -> Result<Vec<EntityId>, PersistError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let known: BTreeSet<&str> = known_remote_ids.into_iter().collect();
        let (kept, confirmed): (BTreeSet<_>, BTreeSet<_>) = std::mem::take(&mut self.ids)
            .into_iter()
            .partition(|id| known.contains(id.as_str()));
        self.ids = kept;

        if !confirmed.is_empty() {
            tracing::debug!(confirmed = confirmed.len(), remaining = self.ids.len(), "pruned tombstones");
            self.store.save_tombstones(&self.ids)?;
        }
        Ok(confirmed.into_iter().collect())
    }

    pub fn ids(&self) -> &BTreeSet<EntityId> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) -> Result<(), PersistError> {
        self.ids.clear();
        self.store.save_tombstones(&self.ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn add_and_has() {
        let store = Arc::new(MemoryStore::new());
        let mut reg = TombstoneRegistry::open(store.clone()).unwrap();
        reg.add(["a", "b"]).unwrap();
        assert!(reg.has("a"));
        assert!(!reg.has("c"));
        assert_eq!(store.load_tombstones().unwrap().len(), 2);
    }

    #[test]
    fn prune_keeps_only_ids_still_reported_remotely() {
        let store = Arc::new(MemoryStore::new());
        let mut reg = TombstoneRegistry::open(store.clone()).unwrap();
        reg.add(["gone", "lingering"]).unwrap();

        let confirmed = reg.prune(["lingering", "unrelated"]).unwrap();
        assert_eq!(confirmed, vec!["gone".to_string()]);
        assert!(reg.has("lingering"));
        assert!(!reg.has("gone"));

        let reopened = TombstoneRegistry::open(store).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn remove_forgets_restored_id() {
        let store = Arc::new(MemoryStore::new());
        let mut reg = TombstoneRegistry::open(store).unwrap();
        reg.add(["a"]).unwrap();
        assert!(reg.remove("a").unwrap());
        assert!(!reg.remove("a").unwrap());
        assert!(reg.is_empty());
    }

    #[test]
    fn persistence_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let mut reg = TombstoneRegistry::open(store.clone()).unwrap();
        store.set_full(true);
        let err = reg.add(["a"]).unwrap_err();
        assert!(err.is_capacity());
        assert!(reg.has("a"));
    }
}
