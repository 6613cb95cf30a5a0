//! Entity model shared by the sync engine.
//!
//! Every mutable record the client owns is one of four entity classes.
//! Each class carries its own strongly typed field set; the typed structs
//! double as the remote-store whitelist (see [`payload`]).

pub mod entities;
pub mod link;
pub mod payload;
pub mod recurring;

use serde::{Deserialize, Serialize};

pub use entities::{Attendee, CalendarEvent, Item, ReminderOverride, Reminders, Task, TaskList};
pub use link::{GoogleResourceLink, ResourceType};
pub use payload::EntityPayload;
pub use recurring::{EndType, Frequency, RecurringConfig};

/// Local identifier of an entity. Ids are client generated (UUID v4).
pub type EntityId = String;

/// The fixed set of syncable entity classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Item,
    Task,
    List,
    Event,
}

impl EntityClass {
    pub const ALL: [EntityClass; 4] = [
        EntityClass::Item,
        EntityClass::Task,
        EntityClass::List,
        EntityClass::Event,
    ];

    /// Remote table holding rows of this class.
    pub fn table(&self) -> &'static str {
        match self {
            EntityClass::Item => "items",
            EntityClass::Task => "tasks",
            EntityClass::List => "lists",
            EntityClass::Event => "events",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Item => "item",
            EntityClass::Task => "task",
            EntityClass::List => "list",
            EntityClass::Event => "event",
        }
    }
}

impl std::fmt::Display for EntityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common accessors the reload merge and reconciler need from any entity.
pub trait SyncEntity: Clone {
    const CLASS: EntityClass;

    fn entity_id(&self) -> &str;

    fn updated_at(&self) -> Option<chrono::DateTime<chrono::Utc>>;

    fn into_payload(self) -> EntityPayload;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_plural_class_names() {
        for class in EntityClass::ALL {
            assert_eq!(class.table(), format!("{}s", class.as_str()));
        }
    }
}
