//! User-visible sync notices.
//!
//! Notices are informational only. Local state stays usable whatever they say.

use std::sync::Mutex;

use crate::model::EntityId;

use super::types::OpType;

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A write was rejected permanently and dropped from the log.
    OperationDropped {
        op_type: OpType,
        id: EntityId,
        reason: String,
    },
    /// A write-through to local storage failed. Pending operations enqueued
    /// from now on may not survive a restart.
    PersistenceDegraded { reason: String },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::OperationDropped { op_type, id, reason } => {
                write!(f, "Could not sync {op_type} for {id}: {reason}")
            }
            Notice::PersistenceDegraded { reason } => {
                write!(f, "Local storage is unavailable, recent changes may be lost on restart: {reason}")
            }
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Emits notices as `warn` log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        tracing::warn!(notice = %notice, "sync notice");
    }
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Notice> {
        match self.notices.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => Vec::new(),
        }
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notice: Notice) {
        if let Ok(mut guard) = self.notices.lock() {
            guard.push(notice);
        }
    }
}
