//! Tagged union over the entity classes, used as the operation payload.
//!
//! Building a payload from an untyped map runs it through the typed field
//! set of its class. Keys that are not columns of that class never survive
//! the conversion, so the remote store only ever sees whitelisted fields.

use serde_json::{Map, Value};

use super::entities::{CalendarEvent, Item, Task, TaskList};
use super::EntityClass;

pub const ITEM_FIELDS: &[&str] = &[
    "id",
    "user_id",
    "folder_id",
    "type",
    "title",
    "content",
    "file_meta",
    "priority",
    "tags",
    "scheduled_at",
    "recurring_config",
    "remind_at",
    "remind_before",
    "bg_color",
    "position",
    "folder_position",
    "is_pinned",
    "is_archived",
    "is_completed",
    "is_deleted",
    "created_at",
    "updated_at",
    "deleted_at",
];

pub const TASK_FIELDS: &[&str] = &[
    "id",
    "user_id",
    "list_id",
    "parent_task_id",
    "title",
    "description",
    "scheduled_at",
    "recurring_config",
    "item_ids",
    "item_completion",
    "is_completed",
    "is_deleted",
    "completed_at",
    "created_at",
    "updated_at",
    "deleted_at",
];

pub const LIST_FIELDS: &[&str] = &[
    "id",
    "user_id",
    "title",
    "color",
    "position",
    "is_deleted",
    "created_at",
    "updated_at",
];

pub const EVENT_FIELDS: &[&str] = &[
    "id",
    "user_id",
    "title",
    "description",
    "start_at",
    "end_at",
    "is_all_day",
    "rrule",
    "parent_event_id",
    "recurring_event_id",
    "is_deleted_instance",
    "location",
    "color_id",
    "visibility",
    "transparency",
    "timezone",
    "attendees",
    "conference_data",
    "reminders",
    "google_event_id",
    "google_calendar_id",
    "is_google_task",
    "google_task_id",
    "is_deleted",
    "created_at",
    "updated_at",
    "deleted_at",
];

/// Columns accepted by the remote table of `class`.
pub fn allowed_fields(class: EntityClass) -> &'static [&'static str] {
    match class {
        EntityClass::Item => ITEM_FIELDS,
        EntityClass::Task => TASK_FIELDS,
        EntityClass::List => LIST_FIELDS,
        EntityClass::Event => EVENT_FIELDS,
    }
}

/// A whitelisted record of one entity class.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPayload {
    Item(Item),
    Task(Task),
    List(TaskList),
    Event(CalendarEvent),
}

impl EntityPayload {
    /// Build a payload from untyped fields, dropping anything the class does
    /// not know about.
    pub fn from_fields(class: EntityClass, fields: Map<String, Value>) -> Result<Self, serde_json::Error> {
        let stripped: Vec<&String> = fields
            .keys()
            .filter(|k| !allowed_fields(class).contains(&k.as_str()))
            .collect();
        if !stripped.is_empty() {
            tracing::debug!(entity = %class, ?stripped, "stripping non-whitelisted fields");
        }

        let value = Value::Object(fields);
        Ok(match class {
            EntityClass::Item => EntityPayload::Item(serde_json::from_value(value)?),
            EntityClass::Task => EntityPayload::Task(serde_json::from_value(value)?),
            EntityClass::List => EntityPayload::List(serde_json::from_value(value)?),
            EntityClass::Event => EntityPayload::Event(serde_json::from_value(value)?),
        })
    }

    pub fn from_value(class: EntityClass, value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Object(map) => Self::from_fields(class, map),
            other => Err(serde::de::Error::custom(format!(
                "{class} payload must be an object, got {other}"
            ))),
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            EntityPayload::Item(v) => serde_json::to_value(v),
            EntityPayload::Task(v) => serde_json::to_value(v),
            EntityPayload::List(v) => serde_json::to_value(v),
            EntityPayload::Event(v) => serde_json::to_value(v),
        }
    }

    pub fn class(&self) -> EntityClass {
        match self {
            EntityPayload::Item(_) => EntityClass::Item,
            EntityPayload::Task(_) => EntityClass::Task,
            EntityPayload::List(_) => EntityClass::List,
            EntityPayload::Event(_) => EntityClass::Event,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityPayload::Item(v) => &v.id,
            EntityPayload::Task(v) => &v.id,
            EntityPayload::List(v) => &v.id,
            EntityPayload::Event(v) => &v.id,
        }
    }
}
