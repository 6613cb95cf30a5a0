//! Offline synchronization layer.
//!
//! Local mutations are enqueued into a durable, collapsing [`OperationLog`];
//! the [`Dispatcher`] drains it against a [`RemoteStore`], adapting its pace to
//! throttling. Hard deletes are remembered in the [`TombstoneRegistry`] so a
//! stale full reload cannot bring them back. [`SyncEngine`] ties it together.

pub mod dispatcher;
pub mod engine;
pub mod notify;
pub mod operation_log;
pub mod reload;
pub mod remote_store;
pub mod tombstones;
pub mod types;


pub use dispatcher::{AdaptiveDelay, Dispatcher, DrainOutcome, DrainReport};
pub use engine::SyncEngine;
pub use notify::{CollectingNotifier, LogNotifier, Notice, Notifier};
pub use operation_log::{EnqueueOutcome, OperationLog};
pub use reload::ReloadSnapshot;
pub use remote_store::{MemoryRemote, RemoteStore, RestRemoteStore};
pub use tombstones::TombstoneRegistry;
pub use types::{
    ErrorClass, Mutation, OpKind, OpType, Operation, QueueRecord, RemoteError, SyncError,
    SyncStats, SyncStatus,
};
