//! Sync engine facade.
//!
//! Owns the operation log, the tombstone registry and the dispatcher, and is
//! the only way callers mutate them.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::model::{EntityClass, EntityId, EntityPayload, SyncEntity};
use crate::storage::{Config, DispatcherConfig, SyncStore};

use super::dispatcher::{lock, Dispatcher, DrainReport};
use super::notify::{Notice, Notifier};
use super::operation_log::{EnqueueOutcome, OperationLog};
use super::reload::{merge_class, ReloadSnapshot};
use super::remote_store::{RemoteStore, RestRemoteStore};
use super::tombstones::TombstoneRegistry;
use super::types::{Operation, SyncError, SyncStatus};

pub struct SyncEngine {
    log: Arc<Mutex<OperationLog>>,
    tombstones: Arc<Mutex<TombstoneRegistry>>,
    dispatcher: Arc<Dispatcher>,
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
}

impl SyncEngine {
    /// Load persisted state and wire the components together.
    ///
    /// # Errors
    /// Returns an error if the persisted log or tombstones cannot be read.
    pub fn open(
        store: Arc<dyn SyncStore>,
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
        config: DispatcherConfig,
    ) -> Result<Self, SyncError> {
        let log = Arc::new(Mutex::new(OperationLog::open(store.clone(), notifier.clone())?));
        let tombstones = Arc::new(Mutex::new(TombstoneRegistry::open(store.clone())?));
        let dispatcher = Arc::new(
            Dispatcher::new(log.clone(), remote.clone(), store, notifier.clone(), config)
                .with_tombstones(tombstones.clone()),
        );

        Ok(Self {
            log,
            tombstones,
            dispatcher,
            remote,
            notifier,
        })
    }

    /// Validate `config` and build an engine against its REST remote.
    ///
    /// # Errors
    /// Returns [`CoreError::Config`](crate::CoreError::Config) for a bad
    /// dispatcher section and [`CoreError::Sync`](crate::CoreError::Sync)
    /// when the remote is unconfigured or the persisted log is unreadable.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn SyncStore>,
        notifier: Arc<dyn Notifier>,
    ) -> crate::error::Result<Self> {
        config.dispatcher.validate()?;
        let remote = RestRemoteStore::new(&config.remote, None)?;
        Ok(Self::open(store, Arc::new(remote), notifier, config.dispatcher.clone())?)
    }

    /// Enqueue an upsert. An upsert of a tombstoned id is a restore.
    pub fn upsert(&self, payload: EntityPayload) -> EnqueueOutcome {
        let id = payload.id().to_string();
        let outcome = lock(&self.log).enqueue_upsert(payload);
        match lock(&self.tombstones).remove(&id) {
            Ok(true) => tracing::debug!(id = %id, "restored tombstoned entity"),
            Ok(false) => {}
            Err(e) => self.persistence_failed(e.to_string()),
        }
        outcome
    }

    pub fn upsert_entity<E: SyncEntity>(&self, entity: E) -> EnqueueOutcome {
        self.upsert(entity.into_payload())
    }

    /// Enqueue a hard delete and tombstone the id.
    pub fn delete(&self, class: EntityClass, id: impl Into<EntityId>) -> EnqueueOutcome {
        let id = id.into();
        let outcome = lock(&self.log).enqueue_delete(class, id.clone());
        if let Err(e) = lock(&self.tombstones).add([id]) {
            self.persistence_failed(e.to_string());
        }
        outcome
    }

    fn persistence_failed(&self, reason: String) {
        tracing::error!(%reason, "failed to persist tombstones");
        self.notifier.notify(Notice::PersistenceDegraded { reason });
    }

    pub async fn process(&self) -> DrainReport {
        self.dispatcher.process().await
    }

    /// Fetch every class from the remote store and merge it with pending
    /// local state. Tombstones are pruned only after every class loaded.
    ///
    /// # Errors
    /// Returns the first remote failure; nothing is pruned in that case.
    pub async fn reload(&self) -> Result<ReloadSnapshot, SyncError> {
        let mut fetched = Vec::with_capacity(EntityClass::ALL.len());
        for class in EntityClass::ALL {
            let rows = self.remote.fetch_all(class).await?;
            tracing::debug!(entity = %class, rows = rows.len(), "fetched remote rows");
            fetched.push((class, rows));
        }

        let remote_ids: BTreeSet<String> = fetched
            .iter()
            .flat_map(|(_, rows)| rows.iter().map(|p| p.id().to_string()))
            .collect();

        let mut snapshot = ReloadSnapshot::default();
        {
            let log = lock(&self.log);
            let tombstones = lock(&self.tombstones);
            for (class, rows) in fetched {
                let merged = merge_class(class, rows, &log, &tombstones, &mut snapshot.suppressed);
                snapshot.rows.insert(class, merged);
            }
        }

        snapshot.pruned = lock(&self.tombstones).prune(remote_ids.iter().map(String::as_str))?;
        tracing::info!(
            suppressed = snapshot.suppressed.len(),
            pruned = snapshot.pruned.len(),
            "reload merged"
        );
        Ok(snapshot)
    }

    /// Destructive kill switch: discard every pending operation.
    pub fn reset(&self) {
        lock(&self.log).clear();
    }

    pub fn status(&self) -> SyncStatus {
        self.dispatcher.status()
    }

    pub fn pending(&self) -> Vec<Operation> {
        lock(&self.log).iter().cloned().collect()
    }

    pub fn has_pending_delete(&self, id: &str) -> bool {
        lock(&self.log).has_pending_delete(id)
    }

    pub fn is_tombstoned(&self, id: &str) -> bool {
        lock(&self.tombstones).has(id)
    }

    pub fn tombstones(&self) -> BTreeSet<EntityId> {
        lock(&self.tombstones).ids().clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn watch_connectivity(&self, online: watch::Receiver<bool>) -> JoinHandle<()> {
        self.dispatcher.watch_connectivity(online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Task, TaskList};
    use crate::storage::MemoryStore;
    use crate::sync::notify::CollectingNotifier;
    use crate::sync::remote_store::MemoryRemote;

    fn engine() -> (SyncEngine, Arc<MemoryRemote>, Arc<MemoryStore>, Arc<CollectingNotifier>) {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MemoryRemote::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let engine = SyncEngine::open(
            store.clone(),
            remote.clone(),
            notifier.clone(),
            DispatcherConfig::default(),
        )
        .unwrap();
        (engine, remote, store, notifier)
    }

    fn list(id: &str) -> TaskList {
        TaskList {
            id: id.into(),
            title: "Groceries".into(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delete_then_stale_reload_does_not_resurrect() {
        let (engine, remote, _, _) = engine();
        remote.seed(EntityPayload::List(list("l-1")));
        remote.set_ignore_deletes(true);

        engine.delete(EntityClass::List, "l-1");
        let snapshot = engine.reload().await.unwrap();
        assert!(!snapshot.contains(EntityClass::List, "l-1"));

        engine.process().await;
        let snapshot = engine.reload().await.unwrap();
        assert!(!snapshot.contains(EntityClass::List, "l-1"));
        assert!(engine.is_tombstoned("l-1"));

        remote.set_ignore_deletes(false);
        engine.delete(EntityClass::List, "l-1");
        engine.process().await;
        let snapshot = engine.reload().await.unwrap();
        assert_eq!(snapshot.pruned, ["l-1"]);
        assert!(!engine.is_tombstoned("l-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_clears_tombstone() {
        let (engine, _, _, _) = engine();
        engine.delete(EntityClass::List, "l-1");
        assert!(engine.is_tombstoned("l-1"));

        assert_eq!(engine.upsert_entity(list("l-1")), EnqueueOutcome::Restored);
        assert!(!engine.is_tombstoned("l-1"));
        assert!(!engine.has_pending_delete("l-1"));
    }

    /// Holds every delete until released.
    struct GatedRemote {
        inner: MemoryRemote,
        gate: tokio::sync::Notify,
        entered: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl RemoteStore for GatedRemote {
        async fn upsert(&self, payload: &EntityPayload) -> Result<(), crate::sync::RemoteError> {
            self.inner.upsert(payload).await
        }

        async fn delete(&self, class: EntityClass, id: &str) -> Result<(), crate::sync::RemoteError> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.delete(class, id).await
        }

        async fn fetch_all(&self, class: EntityClass) -> Result<Vec<EntityPayload>, crate::sync::RemoteError> {
            self.inner.fetch_all(class).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn restore_during_inflight_delete_stays_visible() {
        let remote = Arc::new(GatedRemote {
            inner: MemoryRemote::new(),
            gate: tokio::sync::Notify::new(),
            entered: tokio::sync::Notify::new(),
        });
        remote.inner.seed(EntityPayload::List(list("l-1")));
        let engine = SyncEngine::open(
            Arc::new(MemoryStore::new()),
            remote.clone(),
            Arc::new(CollectingNotifier::new()),
            DispatcherConfig::default(),
        )
        .unwrap();

        engine.delete(EntityClass::List, "l-1");
        let restore = async {
            remote.entered.notified().await;
            assert_eq!(engine.upsert_entity(list("l-1")), EnqueueOutcome::Restored);
            assert!(!engine.is_tombstoned("l-1"));
            remote.gate.notify_one();
        };
        let (report, ()) = tokio::join!(engine.process(), restore);
        assert_eq!(report.succeeded, 2);

        assert!(!engine.is_tombstoned("l-1"));
        assert!(engine.pending().is_empty());
        let snapshot = engine.reload().await.unwrap();
        assert!(snapshot.contains(EntityClass::List, "l-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn reload_keeps_unsynced_local_rows() {
        let (engine, remote, _, _) = engine();
        remote.seed(EntityPayload::Task(Task {
            id: "t-remote".into(),
            ..Default::default()
        }));
        engine.upsert_entity(Task {
            id: "t-local".into(),
            title: "offline".into(),
            ..Default::default()
        });

        let snapshot = engine.reload().await.unwrap();
        assert!(snapshot.contains(EntityClass::Task, "t-remote"));
        assert!(snapshot.contains(EntityClass::Task, "t-local"));
    }

    #[tokio::test(start_paused = true)]
    async fn tombstone_write_failure_warns() {
        let (engine, _, store, notifier) = engine();
        store.set_full(true);
        engine.delete(EntityClass::Task, "t-1");

        assert!(engine.has_pending_delete("t-1"));
        let notices = notifier.take();
        assert!(!notices.is_empty());
        assert!(notices.iter().all(|n| matches!(n, Notice::PersistenceDegraded { .. })));
    }

    fn configured() -> Config {
        let mut config = Config::default();
        config.remote.base_url = "https://db.example.test".into();
        config.remote.api_key = "anon".into();
        config
    }

    #[test]
    fn from_config_builds_against_rest_remote() {
        let engine = SyncEngine::from_config(
            &configured(),
            Arc::new(MemoryStore::new()),
            Arc::new(CollectingNotifier::new()),
        )
        .unwrap();
        assert_eq!(engine.status().pending_count, 0);
    }

    #[test]
    fn from_config_reports_which_layer_failed() {
        let mut bad_dispatcher = configured();
        bad_dispatcher.dispatcher.relief_factor = 1.5;
        let err = SyncEngine::from_config(
            &bad_dispatcher,
            Arc::new(MemoryStore::new()),
            Arc::new(CollectingNotifier::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, crate::CoreError::Config(_)));

        let err = SyncEngine::from_config(
            &Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(CollectingNotifier::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, crate::CoreError::Sync(SyncError::NotConfigured(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_pending_operations() {
        let (engine, _, store, _) = engine();
        engine.upsert_entity(list("l-1"));
        engine.reset();
        assert!(engine.pending().is_empty());
        assert!(store.load_queue().unwrap().is_empty());
        assert_eq!(engine.status().pending_count, 0);
    }
}
