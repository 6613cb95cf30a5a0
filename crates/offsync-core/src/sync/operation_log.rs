//! Durable, collapsing log of pending remote writes.
//!
//! At most one operation is pending per `(class, id)`. Enqueuing replaces the
//! existing entry and moves the key to the tail, so a delete always supersedes
//! a pending upsert and a later upsert restores a pending delete. Every
//! mutation is written through to the [`SyncStore`] before returning.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::model::{EntityClass, EntityId, EntityPayload};
use crate::storage::{PersistError, SyncStore};

use super::notify::{Notice, Notifier};
use super::types::{Mutation, OpKind, OpKey, Operation};

/// What `enqueue` did to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No operation was pending for the key.
    Inserted,
    /// A pending operation for the key was superseded.
    Replaced,
    /// An upsert superseded a pending delete.
    Restored,
}

pub struct OperationLog {
    ops: VecDeque<Operation>,
    next_seq: u64,
    store: Arc<dyn SyncStore>,
    notifier: Arc<dyn Notifier>,
    degraded: bool,
}

impl OperationLog {
    /// Load the persisted log. Records that no longer decode are skipped.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub fn open(store: Arc<dyn SyncStore>, notifier: Arc<dyn Notifier>) -> Result<Self, PersistError> {
        let records = store.load_queue()?;
        let mut log = Self {
            ops: VecDeque::with_capacity(records.len()),
            next_seq: 1,
            store,
            notifier,
            degraded: false,
        };

        for record in records {
            let (id, op_type) = (record.id.clone(), record.op_type);
            match Operation::from_record(record) {
                Ok(mut op) => {
                    op.seq = log.take_seq();
                    // Older builds could leave duplicates behind; last one wins.
                    let key = op.key();
                    log.ops.retain(|o| o.key() != key);
                    log.ops.push_back(op);
                }
                Err(e) => {
                    tracing::warn!(op_id = %id, %op_type, error = %e, "dropping undecodable queue record");
                }
            }
        }

        tracing::debug!(pending = log.ops.len(), "operation log loaded");
        Ok(log)
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn enqueue(&mut self, mut op: Operation) -> EnqueueOutcome {
        let key = op.key();
        let previous = self
            .ops
            .iter()
            .position(|o| o.key() == key)
            .and_then(|idx| self.ops.remove(idx));

        let outcome = match (&previous, op.kind()) {
            (None, _) => EnqueueOutcome::Inserted,
            (Some(prev), OpKind::Upsert) if prev.kind() == OpKind::Delete => EnqueueOutcome::Restored,
            (Some(_), _) => EnqueueOutcome::Replaced,
        };

        op.seq = self.take_seq();
        tracing::debug!(op_id = %op.id, op_type = %op.op_type(), ?outcome, "operation enqueued");
        self.ops.push_back(op);
        self.persist();
        outcome
    }

    pub fn enqueue_upsert(&mut self, payload: EntityPayload) -> EnqueueOutcome {
        self.enqueue(Operation::upsert(payload))
    }

    pub fn enqueue_delete(&mut self, class: EntityClass, id: impl Into<EntityId>) -> EnqueueOutcome {
        self.enqueue(Operation::delete(class, id))
    }

    /// The next operation to dispatch.
    pub fn front(&self) -> Option<&Operation> {
        self.ops.front()
    }

    /// Remove the operation with `seq` after success or a drop decision.
    ///
    /// Returns `false` when it was already superseded by a newer enqueue, in
    /// which case the newer operation stays pending.
    pub fn complete(&mut self, seq: u64) -> bool {
        let Some(idx) = self.position(seq) else {
            return false;
        };
        self.ops.remove(idx);
        self.persist();
        true
    }

    /// Move the operation with `seq` to the tail with one more retry.
    pub fn requeue_tail(&mut self, seq: u64) -> Option<u32> {
        let idx = self.position(seq)?;
        let mut op = self.ops.remove(idx)?;
        op.retry_count += 1;
        let retries = op.retry_count;
        self.ops.push_back(op);
        self.persist();
        Some(retries)
    }

    fn position(&self, seq: u64) -> Option<usize> {
        self.ops.iter().position(|o| o.seq == seq)
    }

    pub fn get(&self, class: EntityClass, id: &str) -> Option<&Operation> {
        self.ops.iter().find(|o| o.class() == class && o.id == id)
    }

    pub fn has_pending_delete(&self, id: &str) -> bool {
        self.ops
            .iter()
            .any(|o| o.id == id && o.kind() == OpKind::Delete)
    }

    /// Ids with a pending delete, across all classes.
    pub fn pending_deletes(&self) -> HashSet<EntityId> {
        self.ops
            .iter()
            .filter(|o| o.kind() == OpKind::Delete)
            .map(|o| o.id.clone())
            .collect()
    }

    /// Payloads of pending upserts for one class, in log order.
    pub fn pending_upserts(&self, class: EntityClass) -> Vec<&EntityPayload> {
        self.ops
            .iter()
            .filter_map(|o| match &o.mutation {
                Mutation::Upsert(payload) if payload.class() == class => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<OpKey> {
        self.ops.iter().map(Operation::key).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Discard every pending operation. Destructive.
    pub fn clear(&mut self) {
        let dropped = self.ops.len();
        self.ops.clear();
        tracing::warn!(dropped, "operation log cleared");
        self.persist();
    }

    /// Whether the last write-through failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Write the log through to the store. A failure is surfaced once per
    /// degraded streak and never propagated.
    fn persist(&mut self) {
        let records: Result<Vec<_>, _> = self.ops.iter().map(Operation::to_record).collect();
        let result = match records {
            Ok(records) => self.store.save_queue(&records),
            Err(e) => Err(PersistError::from(e)),
        };

        match result {
            Ok(()) => {
                if self.degraded {
                    tracing::info!("operation log persistence recovered");
                }
                self.degraded = false;
            }
            Err(e) => {
                tracing::error!(error = %e, capacity = e.is_capacity(), "failed to persist operation log");
                if !self.degraded {
                    self.notifier.notify(Notice::PersistenceDegraded {
                        reason: e.to_string(),
                    });
                }
                self.degraded = true;
            }
        }
    }
}
