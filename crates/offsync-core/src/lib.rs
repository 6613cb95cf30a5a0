//! # Offsync Core Library
//!
//! Offline-first sync engine for a notes, tasks and calendar client.
//! Every local mutation is recorded in a durable operation log and drained
//! against a remote store whenever connectivity allows; the same library
//! backs the `offsync` CLI.
//!
//! ## Architecture
//!
//! - **Operation log**: at most one pending write per entity, persisted
//!   write-through so nothing is lost across restarts
//! - **Dispatcher**: reentrancy-guarded drain loop with a rate-adaptive delay
//!   and per-class failure handling
//! - **Tombstones**: confirmed deletes that keep stale reloads from
//!   resurrecting records
//! - **Recurrence**: pure next-occurrence calculation for recurring items
//! - **Calendar series**: scoped (`all` / `this` / `following`) edits of
//!   recurring events
//! - **Integrations**: push/pull reconciliation with Google Calendar and Tasks
//!
//! ## Key Components
//!
//! - [`SyncEngine`]: facade over the log, dispatcher and tombstones
//! - [`Database`]: SQLite persistence
//! - [`Config`]: TOML configuration
//! - [`Reconciler`]: Google reconciliation

pub mod calendar;
pub mod error;
pub mod integrations;
pub mod model;
pub mod recurrence;
pub mod storage;
pub mod sync;

pub use calendar::{EditMode, EditScope, EventUpdate, SeriesChange, SeriesEditor};
pub use error::{ConfigError, CoreError, DatabaseError, ReconcileError, SeriesEditError};
pub use integrations::{GoogleClient, KeyringTokenSource, LocalState, ReconcileReport, Reconciler};
pub use model::{CalendarEvent, EntityClass, EntityId, EntityPayload, Item, RecurringConfig, Task, TaskList};
pub use recurrence::{next_occurrence, next_occurrence_from};
pub use storage::{Config, Database, MemoryStore, PersistError, SyncStore};
pub use sync::{
    Dispatcher, LogNotifier, Notice, Notifier, Operation, RemoteStore, RestRemoteStore, SyncEngine, SyncError,
    SyncStats, SyncStatus,
};
