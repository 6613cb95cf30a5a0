//! Core types for the operation log and dispatcher.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::model::{EntityClass, EntityId, EntityPayload};
use crate::storage::PersistError;

/// Whether an operation writes or removes a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Upsert,
    Delete,
}

/// Persisted operation type tag, e.g. `upsert-task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    #[serde(rename = "upsert-item")]
    UpsertItem,
    #[serde(rename = "delete-item")]
    DeleteItem,
    #[serde(rename = "upsert-task")]
    UpsertTask,
    #[serde(rename = "delete-task")]
    DeleteTask,
    #[serde(rename = "upsert-list")]
    UpsertList,
    #[serde(rename = "delete-list")]
    DeleteList,
    #[serde(rename = "upsert-event")]
    UpsertEvent,
    #[serde(rename = "delete-event")]
    DeleteEvent,
}

impl OpType {
    pub fn new(kind: OpKind, class: EntityClass) -> Self {
        match (kind, class) {
            (OpKind::Upsert, EntityClass::Item) => OpType::UpsertItem,
            (OpKind::Delete, EntityClass::Item) => OpType::DeleteItem,
            (OpKind::Upsert, EntityClass::Task) => OpType::UpsertTask,
            (OpKind::Delete, EntityClass::Task) => OpType::DeleteTask,
            (OpKind::Upsert, EntityClass::List) => OpType::UpsertList,
            (OpKind::Delete, EntityClass::List) => OpType::DeleteList,
            (OpKind::Upsert, EntityClass::Event) => OpType::UpsertEvent,
            (OpKind::Delete, EntityClass::Event) => OpType::DeleteEvent,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            OpType::UpsertItem | OpType::UpsertTask | OpType::UpsertList | OpType::UpsertEvent => {
                OpKind::Upsert
            }
            OpType::DeleteItem | OpType::DeleteTask | OpType::DeleteList | OpType::DeleteEvent => {
                OpKind::Delete
            }
        }
    }

    pub fn class(&self) -> EntityClass {
        match self {
            OpType::UpsertItem | OpType::DeleteItem => EntityClass::Item,
            OpType::UpsertTask | OpType::DeleteTask => EntityClass::Task,
            OpType::UpsertList | OpType::DeleteList => EntityClass::List,
            OpType::UpsertEvent | OpType::DeleteEvent => EntityClass::Event,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::UpsertItem => "upsert-item",
            OpType::DeleteItem => "delete-item",
            OpType::UpsertTask => "upsert-task",
            OpType::DeleteTask => "delete-task",
            OpType::UpsertList => "upsert-list",
            OpType::DeleteList => "delete-list",
            OpType::UpsertEvent => "upsert-event",
            OpType::DeleteEvent => "delete-event",
        }
    }
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a pending operation does to the remote row.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Upsert(EntityPayload),
    Delete(EntityClass),
}

/// Collapsing key: one pending operation per `(class, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpKey {
    pub class: EntityClass,
    pub id: EntityId,
}

/// A single pending mutation destined for the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: EntityId,
    pub mutation: Mutation,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    /// Log-assigned sequence number; distinguishes an operation from a
    /// later replacement for the same key. Not persisted.
    pub(crate) seq: u64,
}

impl Operation {
    pub fn upsert(payload: EntityPayload) -> Self {
        Self {
            id: payload.id().to_string(),
            mutation: Mutation::Upsert(payload),
            enqueued_at: Utc::now(),
            retry_count: 0,
            seq: 0,
        }
    }

    pub fn delete(class: EntityClass, id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            mutation: Mutation::Delete(class),
            enqueued_at: Utc::now(),
            retry_count: 0,
            seq: 0,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self.mutation {
            Mutation::Upsert(_) => OpKind::Upsert,
            Mutation::Delete(_) => OpKind::Delete,
        }
    }

    pub fn class(&self) -> EntityClass {
        match &self.mutation {
            Mutation::Upsert(payload) => payload.class(),
            Mutation::Delete(class) => *class,
        }
    }

    pub fn op_type(&self) -> OpType {
        OpType::new(self.kind(), self.class())
    }

    pub fn key(&self) -> OpKey {
        OpKey {
            class: self.class(),
            id: self.id.clone(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Encode into the persisted queue record shape.
    pub fn to_record(&self) -> Result<QueueRecord, serde_json::Error> {
        let payload = match &self.mutation {
            Mutation::Upsert(payload) => payload.to_value()?,
            Mutation::Delete(_) => json!({ "id": self.id }),
        };
        Ok(QueueRecord {
            id: self.id.clone(),
            op_type: self.op_type(),
            payload,
            timestamp: self.enqueued_at.timestamp_millis(),
            retries: self.retry_count,
        })
    }

    pub fn from_record(record: QueueRecord) -> Result<Self, serde_json::Error> {
        let class = record.op_type.class();
        let mutation = match record.op_type.kind() {
            OpKind::Upsert => Mutation::Upsert(EntityPayload::from_value(class, record.payload)?),
            OpKind::Delete => Mutation::Delete(class),
        };
        Ok(Self {
            id: record.id,
            mutation,
            enqueued_at: Utc
                .timestamp_millis_opt(record.timestamp)
                .single()
                .unwrap_or_else(Utc::now),
            retry_count: record.retries,
            seq: 0,
        })
    }
}

/// One persisted queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub op_type: OpType,
    pub payload: Value,
    /// Enqueue time, unix milliseconds.
    pub timestamp: i64,
    pub retries: u32,
}

/// Sync health counters, persisted after every dispatcher step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStats {
    #[serde(rename = "totalProcessed")]
    pub total_processed: u64,
    #[serde(rename = "totalFailed")]
    pub total_failed: u64,
    #[serde(rename = "avgProcessingTimeMs")]
    pub avg_processing_time_ms: f64,
    /// Unix milliseconds.
    #[serde(rename = "lastProcessedAt")]
    pub last_processed_at: Option<i64>,
    /// Unix milliseconds of the last throttling response.
    #[serde(rename = "last429At")]
    pub last_429_at: Option<i64>,
    #[serde(rename = "currentRateLimitMs")]
    pub current_rate_limit_ms: u64,
}

impl SyncStats {
    pub fn record_success(&mut self, elapsed_ms: f64, now: DateTime<Utc>) {
        self.total_processed += 1;
        let n = self.total_processed as f64;
        self.avg_processing_time_ms += (elapsed_ms - self.avg_processing_time_ms) / n;
        self.last_processed_at = Some(now.timestamp_millis());
    }

    pub fn record_failure(&mut self) {
        self.total_failed += 1;
    }

    pub fn record_throttle(&mut self, now: DateTime<Utc>) {
        self.last_429_at = Some(now.timestamp_millis());
    }
}

/// Snapshot for surrounding UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub pending_count: usize,
    pub in_progress: bool,
    pub stats: SyncStats,
}

/// How the dispatcher reacts to a failed remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the same operation in place after growing the delay.
    Throttled,
    /// Remote state already reflects the intent; drop without retry.
    ConflictAsSuccess,
    /// Drop, count as failed, notify once.
    Permanent,
    /// Stop draining until connectivity returns.
    Network,
    /// Requeue at the tail with backoff.
    Transient,
}

/// Classifiable failure from the remote store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("Rate limited")]
    RateLimited,

    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error (status {status:?}): {message}")]
    Other { status: Option<u16>, message: String },
}

impl RemoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::RateLimited => ErrorClass::Throttled,
            RemoteError::UniqueViolation(_) => ErrorClass::ConflictAsSuccess,
            RemoteError::Schema(_) => ErrorClass::Permanent,
            RemoteError::Network(_) => ErrorClass::Network,
            RemoteError::Other { .. } => ErrorClass::Transient,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            RemoteError::Network(err.to_string())
        } else {
            RemoteError::Other {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

/// Sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote store not configured: {0}")]
    NotConfigured(String),
}
