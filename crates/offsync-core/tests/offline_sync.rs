//! End-to-end behavior of the operation log, dispatcher and tombstones
//! across restarts and stale reloads.

use std::sync::Arc;

use offsync_core::storage::{Database, DispatcherConfig};
use offsync_core::sync::{CollectingNotifier, DrainOutcome, MemoryRemote, SyncEngine};
use offsync_core::{EntityClass, EntityPayload, Item, Task};

fn task(id: &str, title: &str) -> EntityPayload {
    EntityPayload::Task(Task {
        id: id.into(),
        title: title.into(),
        ..Default::default()
    })
}

fn open(db: Arc<Database>, remote: Arc<MemoryRemote>) -> SyncEngine {
    SyncEngine::open(
        db,
        remote,
        Arc::new(CollectingNotifier::new()),
        DispatcherConfig::default(),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn pending_writes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsync.db");
    let remote = Arc::new(MemoryRemote::new());

    {
        let engine = open(Arc::new(Database::open_at(&path).unwrap()), remote.clone());
        engine.dispatcher().set_online(false);
        engine.upsert(task("t-1", "draft"));
        engine.upsert(task("t-1", "final"));
        engine.upsert(EntityPayload::Item(Item {
            id: "i-1".into(),
            title: "note".into(),
            ..Default::default()
        }));
        engine.delete(EntityClass::Item, "i-1");
        assert_eq!(engine.process().await.outcome, DrainOutcome::Offline);
    }

    let engine = open(Arc::new(Database::open_at(&path).unwrap()), remote.clone());
    let pending: Vec<_> = engine.pending().iter().map(|op| (op.op_type().as_str(), op.id.clone())).collect();
    assert_eq!(
        pending,
        vec![("upsert-task", "t-1".to_string()), ("delete-item", "i-1".to_string())]
    );
    assert!(engine.is_tombstoned("i-1"));

    let report = engine.process().await;
    assert_eq!(report.outcome, DrainOutcome::Drained);
    match remote.get(EntityClass::Task, "t-1") {
        Some(EntityPayload::Task(t)) => assert_eq!(t.title, "final"),
        other => panic!("unexpected remote row: {other:?}"),
    }
    assert_eq!(engine.status().stats.total_processed, 2);
}

#[tokio::test(start_paused = true)]
async fn stale_reload_after_restart_does_not_resurrect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsync.db");
    let remote = Arc::new(MemoryRemote::new());
    remote.seed(task("t-9", "old"));
    // The remote acknowledges the delete but a replica keeps serving the row.
    remote.set_ignore_deletes(true);

    {
        let engine = open(Arc::new(Database::open_at(&path).unwrap()), remote.clone());
        engine.delete(EntityClass::Task, "t-9");
        engine.process().await;
        assert!(engine.pending().is_empty());
    }

    let engine = open(Arc::new(Database::open_at(&path).unwrap()), remote.clone());
    let snapshot = engine.reload().await.unwrap();
    assert!(!snapshot.contains(EntityClass::Task, "t-9"));
    assert!(engine.is_tombstoned("t-9"));

    remote.set_ignore_deletes(false);
    engine.delete(EntityClass::Task, "t-9");
    engine.process().await;
    let snapshot = engine.reload().await.unwrap();
    assert_eq!(snapshot.pruned, vec!["t-9".to_string()]);
    assert!(engine.tombstones().is_empty());
}
