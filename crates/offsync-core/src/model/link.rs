//! Mapping between local entities and Google resources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    GoogleTask,
    GoogleEvent,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::GoogleTask => "google_task",
            ResourceType::GoogleEvent => "google_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google_task" => Some(ResourceType::GoogleTask),
            "google_event" => Some(ResourceType::GoogleEvent),
            _ => None,
        }
    }
}

/// One link per `(local_id, resource_type)`. A link whose container no
/// longer matches is deleted and recreated, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleResourceLink {
    pub local_id: EntityId,
    pub resource_type: ResourceType,
    pub remote_id: String,
    /// Calendar id or task-list id holding the remote resource.
    pub container_id: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl GoogleResourceLink {
    pub fn new(
        local_id: impl Into<EntityId>,
        resource_type: ResourceType,
        remote_id: impl Into<String>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            resource_type,
            remote_id: remote_id.into(),
            container_id: container_id.into(),
            last_synced_at: Some(Utc::now()),
            error: None,
        }
    }

    /// A local record edited after the last successful push needs pushing.
    pub fn is_stale_for(&self, local_updated_at: Option<DateTime<Utc>>) -> bool {
        match (self.last_synced_at, local_updated_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(synced), Some(updated)) => updated > synced,
        }
    }
}
