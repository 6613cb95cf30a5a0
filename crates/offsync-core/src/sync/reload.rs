//! Merging a full remote reload with unsynced local state.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{EntityClass, EntityId, EntityPayload};

use super::operation_log::OperationLog;
use super::tombstones::TombstoneRegistry;

/// Visible rows per class after a reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadSnapshot {
    pub rows: BTreeMap<EntityClass, Vec<EntityPayload>>,
    /// Remote rows hidden because they are deleted locally.
    pub suppressed: Vec<EntityId>,
    /// Tombstones forgotten because the remote no longer reports them.
    pub pruned: Vec<EntityId>,
}

impl ReloadSnapshot {
    pub fn rows(&self, class: EntityClass) -> &[EntityPayload] {
        self.rows.get(&class).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, class: EntityClass, id: &str) -> bool {
        self.rows(class).iter().any(|p| p.id() == id)
    }
}

/// Merge one class of remote rows with local pending state.
///
/// Rows whose id has a pending delete or a tombstone are dropped. A pending
/// local upsert replaces the remote row with the same id, and pending upserts
/// the server has not seen yet are appended in log order.
pub fn merge_class(
    class: EntityClass,
    remote_rows: Vec<EntityPayload>,
    log: &OperationLog,
    tombstones: &TombstoneRegistry,
    suppressed: &mut Vec<EntityId>,
) -> Vec<EntityPayload> {
    let pending_deletes = log.pending_deletes();
    let mut local: HashMap<&str, &EntityPayload> = log
        .pending_upserts(class)
        .into_iter()
        .map(|p| (p.id(), p))
        .collect();
    let local_order: Vec<&str> = log.pending_upserts(class).into_iter().map(|p| p.id()).collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(remote_rows.len());
    for row in remote_rows {
        let id = row.id().to_string();
        if pending_deletes.contains(&id) || tombstones.has(&id) {
            tracing::debug!(entity = %class, id = %id, "suppressing locally deleted row");
            suppressed.push(id);
            continue;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        match local.remove(id.as_str()) {
            Some(pending) => merged.push(pending.clone()),
            None => merged.push(row),
        }
    }

    for id in local_order {
        if let Some(pending) = local.remove(id) {
            merged.push(pending.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;
    use crate::storage::MemoryStore;
    use crate::sync::notify::LogNotifier;
    use std::sync::Arc;

    fn task(id: &str, title: &str) -> EntityPayload {
        EntityPayload::Task(Task {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        })
    }

    fn title(p: &EntityPayload) -> &str {
        match p {
            EntityPayload::Task(t) => &t.title,
            _ => "",
        }
    }

    #[test]
    fn merge_applies_deletes_tombstones_and_local_wins() {
        let store = Arc::new(MemoryStore::new());
        let mut log = OperationLog::open(store.clone(), Arc::new(LogNotifier)).unwrap();
        let mut tombstones = TombstoneRegistry::open(store).unwrap();

        log.enqueue_upsert(task("edited", "local title"));
        log.enqueue_upsert(task("new", "not on server"));
        log.enqueue_delete(EntityClass::Task, "pending-delete");
        tombstones.add(["tombstoned"]).unwrap();

        let remote = vec![
            task("plain", "remote"),
            task("edited", "remote title"),
            task("pending-delete", "remote"),
            task("tombstoned", "remote"),
        ];
        let mut suppressed = Vec::new();
        let merged = merge_class(EntityClass::Task, remote, &log, &tombstones, &mut suppressed);

        let ids: Vec<&str> = merged.iter().map(|p| p.id()).collect();
        assert_eq!(ids, ["plain", "edited", "new"]);
        assert_eq!(title(&merged[1]), "local title");
        assert_eq!(suppressed, ["pending-delete", "tombstoned"]);
    }

    #[test]
    fn merge_ignores_pending_upserts_of_other_classes() {
        let store = Arc::new(MemoryStore::new());
        let mut log = OperationLog::open(store.clone(), Arc::new(LogNotifier)).unwrap();
        let tombstones = TombstoneRegistry::open(store).unwrap();
        log.enqueue_upsert(task("t-1", "task"));

        let mut suppressed = Vec::new();
        let merged = merge_class(EntityClass::List, Vec::new(), &log, &tombstones, &mut suppressed);
        assert!(merged.is_empty());
    }
}
