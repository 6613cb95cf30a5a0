//! Recurring series editing: `all`, `this` and `following` scopes.
//!
//! Edits operate on the local event map and return the set of writes the
//! caller must enqueue. Scope arguments are validated before anything is
//! touched, so a contract violation never leaves a partial edit behind.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SeriesEditError;
use crate::model::{Attendee, CalendarEvent, EntityClass, EntityId, Reminders};
use crate::sync::SyncEngine;

use super::rules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    All,
    This,
    Following,
}

impl EditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditMode::All => "all",
            EditMode::This => "this",
            EditMode::Following => "following",
        }
    }
}

impl FromStr for EditMode {
    type Err = SeriesEditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(EditMode::All),
            "this" => Ok(EditMode::This),
            "following" => Ok(EditMode::Following),
            other => Err(SeriesEditError::UnknownMode(other.to_string())),
        }
    }
}

/// A validated edit scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditScope {
    All,
    This { original_start: DateTime<Utc> },
    Following { original_start: DateTime<Utc> },
}

impl EditScope {
    /// Build a scope from a mode and the ISO start of the occurrence acted on.
    ///
    /// # Errors
    /// `this`/`following` without a parsable `original_start` is rejected.
    pub fn new(mode: EditMode, original_start: Option<&str>) -> Result<Self, SeriesEditError> {
        let parse = |mode: EditMode| -> Result<DateTime<Utc>, SeriesEditError> {
            let raw = original_start
                .filter(|s| !s.trim().is_empty())
                .ok_or(SeriesEditError::MissingOriginalStart(mode.as_str()))?;
            rules::parse_occurrence(raw).ok_or_else(|| SeriesEditError::InvalidOriginalStart(raw.to_string()))
        };

        Ok(match mode {
            EditMode::All => EditScope::All,
            EditMode::This => EditScope::This {
                original_start: parse(mode)?,
            },
            EditMode::Following => EditScope::Following {
                original_start: parse(mode)?,
            },
        })
    }

    pub fn parse(mode: &str, original_start: Option<&str>) -> Result<Self, SeriesEditError> {
        Self::new(mode.parse()?, original_start)
    }
}

/// Proposed field changes. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub is_all_day: Option<bool>,
    pub rrule: Option<String>,
    pub location: Option<String>,
    pub color_id: Option<String>,
    pub visibility: Option<String>,
    pub transparency: Option<String>,
    pub timezone: Option<String>,
    pub attendees: Option<Vec<Attendee>>,
    pub conference_data: Option<serde_json::Value>,
    pub reminders: Option<Reminders>,
}

impl EventUpdate {
    pub fn apply(&self, event: &mut CalendarEvent) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        set(&mut event.title, &self.title);
        set_opt(&mut event.description, &self.description);
        set(&mut event.start_at, &self.start_at);
        set(&mut event.end_at, &self.end_at);
        set(&mut event.is_all_day, &self.is_all_day);
        set_opt(&mut event.location, &self.location);
        set_opt(&mut event.color_id, &self.color_id);
        set_opt(&mut event.visibility, &self.visibility);
        set_opt(&mut event.transparency, &self.transparency);
        set_opt(&mut event.timezone, &self.timezone);
        set(&mut event.attendees, &self.attendees);
        set_opt(&mut event.conference_data, &self.conference_data);
        set_opt(&mut event.reminders, &self.reminders);
        if let Some(rule) = &self.rrule {
            event.rrule = Some(rule.clone()).filter(|r| !r.trim().is_empty());
        }
    }
}

/// Writes produced by one series edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesChange {
    pub upserts: Vec<CalendarEvent>,
    pub deletes: Vec<EntityId>,
}

impl SeriesChange {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    /// Enqueue every write, each as its own operation.
    pub fn enqueue(self, engine: &SyncEngine) {
        for event in self.upserts {
            engine.upsert_entity(event);
        }
        for id in self.deletes {
            engine.delete(EntityClass::Event, id);
        }
    }
}

/// Applies scoped edits to a local event map.
pub struct SeriesEditor<'a> {
    events: &'a mut BTreeMap<EntityId, CalendarEvent>,
    now: DateTime<Utc>,
}

impl<'a> SeriesEditor<'a> {
    pub fn new(events: &'a mut BTreeMap<EntityId, CalendarEvent>) -> Self {
        Self {
            events,
            now: Utc::now(),
        }
    }

    /// Fix the clock used for `updated_at` stamps.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn edit(
        &mut self,
        target_id: &str,
        update: &EventUpdate,
        scope: EditScope,
    ) -> Result<SeriesChange, SeriesEditError> {
        let (target, master) = self.resolve(target_id)?;
        if let Some(rule) = &update.rrule {
            if !rule.trim().is_empty() {
                rules::validate(update.start_at.unwrap_or(master.start_at), rule)?;
            }
        }
        tracing::debug!(event_id = %target_id, master_id = %master.id, ?scope, "editing series");

        let mut change = SeriesChange::default();
        match scope {
            EditScope::All => self.edit_all(&master, update, &mut change),
            EditScope::This { original_start } => {
                if target.is_exception() {
                    let mut exception = target;
                    update.apply(&mut exception);
                    self.stage_upsert(exception, &mut change);
                } else if !master.is_recurring() {
                    self.edit_all(&master, update, &mut change);
                } else {
                    let mut exception = self.exception_for(&master, original_start);
                    exception.is_deleted_instance = false;
                    update.apply(&mut exception);
                    self.stage_upsert(exception, &mut change);
                }
            }
            EditScope::Following { original_start } => {
                if splits_whole_series(&master, original_start) {
                    self.edit_all(&master, update, &mut change);
                } else {
                    self.split(&master, original_start, Some(update), &mut change)?;
                }
            }
        }
        Ok(change)
    }

    pub fn delete(&mut self, target_id: &str, scope: EditScope) -> Result<SeriesChange, SeriesEditError> {
        let (target, master) = self.resolve(target_id)?;
        tracing::debug!(event_id = %target_id, master_id = %master.id, ?scope, "deleting from series");

        let mut change = SeriesChange::default();
        match scope {
            EditScope::All => self.delete_series(&master.id, &mut change),
            EditScope::This { original_start } => {
                if target.is_exception() {
                    let mut exception = target;
                    exception.is_deleted_instance = true;
                    self.stage_upsert(exception, &mut change);
                } else if !master.is_recurring() {
                    self.delete_series(&master.id, &mut change);
                } else {
                    let mut exception = self.exception_for(&master, original_start);
                    exception.is_deleted_instance = true;
                    self.stage_upsert(exception, &mut change);
                }
            }
            EditScope::Following { original_start } => {
                if splits_whole_series(&master, original_start) {
                    self.delete_series(&master.id, &mut change);
                } else {
                    self.split(&master, original_start, None, &mut change)?;
                }
            }
        }
        Ok(change)
    }

    /// Target event and its series master.
    fn resolve(&self, target_id: &str) -> Result<(CalendarEvent, CalendarEvent), SeriesEditError> {
        let target = self
            .events
            .get(target_id)
            .cloned()
            .ok_or_else(|| SeriesEditError::UnknownEvent(target_id.to_string()))?;
        let master = match &target.parent_event_id {
            Some(parent) => self
                .events
                .get(parent)
                .cloned()
                .ok_or_else(|| SeriesEditError::UnknownEvent(parent.clone()))?,
            None => target.clone(),
        };
        Ok((target, master))
    }

    fn exceptions_of(&self, master_id: &str) -> Vec<&CalendarEvent> {
        self.events
            .values()
            .filter(|e| e.parent_event_id.as_deref() == Some(master_id))
            .collect()
    }

    /// Existing exception for the occurrence, or a fresh copy of the master.
    fn exception_for(&self, master: &CalendarEvent, original_start: DateTime<Utc>) -> CalendarEvent {
        let existing = self.exceptions_of(&master.id).into_iter().find(|e| {
            e.recurring_event_id
                .as_deref()
                .and_then(rules::parse_occurrence)
                == Some(original_start)
        });
        if let Some(existing) = existing {
            return existing.clone();
        }

        let duration = master.end_at - master.start_at;
        CalendarEvent {
            id: uuid::Uuid::new_v4().to_string(),
            start_at: original_start,
            end_at: original_start + duration,
            rrule: None,
            parent_event_id: Some(master.id.clone()),
            recurring_event_id: Some(rules::occurrence_key(original_start)),
            is_deleted_instance: false,
            google_event_id: None,
            created_at: Some(self.now),
            ..master.clone()
        }
    }

    fn edit_all(&mut self, master: &CalendarEvent, update: &EventUpdate, change: &mut SeriesChange) {
        let mut master = master.clone();
        update.apply(&mut master);
        self.stage_upsert(master, change);
    }

    fn delete_series(&mut self, master_id: &str, change: &mut SeriesChange) {
        let exception_ids: Vec<EntityId> = self
            .exceptions_of(master_id)
            .into_iter()
            .map(|e| e.id.clone())
            .collect();
        for id in exception_ids {
            self.stage_delete(id, change);
        }
        self.stage_delete(master_id.to_string(), change);
    }

    /// Truncate `master` before `split`, drop exceptions on or after it and,
    /// for edits, start a new series at the split point.
    fn split(
        &mut self,
        master: &CalendarEvent,
        split: DateTime<Utc>,
        update: Option<&EventUpdate>,
        change: &mut SeriesChange,
    ) -> Result<(), SeriesEditError> {
        let original_rule = master.rrule.clone().unwrap_or_default();
        let truncated_rule = rules::truncate_until(&original_rule, split);
        rules::validate(master.start_at, &truncated_rule)?;

        let new_master = update.map(|update| {
            let duration = master.end_at - master.start_at;
            let mut next = CalendarEvent {
                id: uuid::Uuid::new_v4().to_string(),
                start_at: split,
                end_at: split + duration,
                rrule: Some(original_rule.clone()),
                parent_event_id: None,
                recurring_event_id: None,
                is_deleted_instance: false,
                google_event_id: None,
                created_at: Some(self.now),
                ..master.clone()
            };
            update.apply(&mut next);
            next
        });

        let dropped: Vec<EntityId> = self
            .exceptions_of(&master.id)
            .into_iter()
            .filter(|e| {
                e.recurring_event_id
                    .as_deref()
                    .and_then(rules::parse_occurrence)
                    .map_or(e.start_at >= split, |original| original >= split)
            })
            .map(|e| e.id.clone())
            .collect();

        let mut truncated = master.clone();
        truncated.rrule = Some(truncated_rule);
        self.stage_upsert(truncated, change);
        for id in dropped {
            self.stage_delete(id, change);
        }
        if let Some(next) = new_master {
            self.stage_upsert(next, change);
        }
        Ok(())
    }

    fn stage_upsert(&mut self, mut event: CalendarEvent, change: &mut SeriesChange) {
        event.updated_at = Some(self.now);
        self.events.insert(event.id.clone(), event.clone());
        change.upserts.push(event);
    }

    fn stage_delete(&mut self, id: EntityId, change: &mut SeriesChange) {
        self.events.remove(&id);
        change.deletes.push(id);
    }
}

/// A split on or before the master's first day would leave the truncated
/// rule with `UNTIL` before `DTSTART`, so the whole series is affected.
fn splits_whole_series(master: &CalendarEvent, split: DateTime<Utc>) -> bool {
    !master.is_recurring() || split.date_naive() <= master.start_at.date_naive()
}

/// Visible occurrences of a series in `[from, to]`, exceptions applied.
///
/// Deleted-instance exceptions hide their occurrence. Each returned event is
/// either an exception record or a synthesized copy of the master.
pub fn expand_series(
    master: &CalendarEvent,
    events: &BTreeMap<EntityId, CalendarEvent>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<CalendarEvent>, SeriesEditError> {
    let Some(rule) = master.rrule.as_deref().filter(|r| !r.trim().is_empty()) else {
        let visible = master.start_at <= to && master.end_at >= from;
        return Ok(if visible { vec![master.clone()] } else { Vec::new() });
    };

    let overrides: BTreeMap<DateTime<Utc>, &CalendarEvent> = events
        .values()
        .filter(|e| e.parent_event_id.as_deref() == Some(master.id.as_str()))
        .filter_map(|e| {
            let original = e.recurring_event_id.as_deref().and_then(rules::parse_occurrence)?;
            Some((original, e))
        })
        .collect();

    let duration = master.end_at - master.start_at;
    let mut out = Vec::new();
    for start in rules::occurrences(master.start_at, rule, from, to)? {
        match overrides.get(&start) {
            Some(exception) if exception.is_deleted_instance => {}
            Some(exception) => out.push((*exception).clone()),
            None => out.push(CalendarEvent {
                start_at: start,
                end_at: start + duration,
                ..master.clone()
            }),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        rules::parse_occurrence(s).unwrap()
    }

    fn daily_master() -> BTreeMap<EntityId, CalendarEvent> {
        let master = CalendarEvent {
            id: "m".into(),
            title: "Standup".into(),
            start_at: at("2024-01-01T09:00:00Z"),
            end_at: at("2024-01-01T09:15:00Z"),
            rrule: Some("FREQ=DAILY".into()),
            ..Default::default()
        };
        BTreeMap::from([(master.id.clone(), master)])
    }

    fn exceptions(events: &BTreeMap<EntityId, CalendarEvent>) -> Vec<&CalendarEvent> {
        events.values().filter(|e| e.is_exception()).collect()
    }

    fn retitle(title: &str) -> EventUpdate {
        EventUpdate {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    #[test]
    fn scope_requires_original_start() {
        assert_eq!(EditScope::parse("all", None), Ok(EditScope::All));
        assert_eq!(
            EditScope::parse("this", None),
            Err(SeriesEditError::MissingOriginalStart("this"))
        );
        assert!(matches!(
            EditScope::parse("following", Some("yesterday")),
            Err(SeriesEditError::InvalidOriginalStart(_))
        ));
        assert!(matches!(
            EditScope::parse("some", Some("2024-01-01T09:00:00Z")),
            Err(SeriesEditError::UnknownMode(_))
        ));
    }

    #[test]
    fn all_edit_updates_master_even_from_exception() {
        let mut events = daily_master();
        let scope = EditScope::parse("this", Some("2024-01-03T09:00:00Z")).unwrap();
        let change = SeriesEditor::new(&mut events).edit("m", &retitle("moved"), scope).unwrap();
        let exception_id = change.upserts[0].id.clone();

        let change = SeriesEditor::new(&mut events)
            .edit(&exception_id, &retitle("renamed"), EditScope::All)
            .unwrap();
        assert_eq!(change.upserts.len(), 1);
        assert_eq!(change.upserts[0].id, "m");
        assert_eq!(events["m"].title, "renamed");
        assert_eq!(events[&exception_id].title, "moved");
    }

    #[test]
    fn all_edit_on_single_event() {
        let mut events = daily_master();
        events.get_mut("m").unwrap().rrule = None;
        let change = SeriesEditor::new(&mut events).edit("m", &retitle("once"), EditScope::All).unwrap();
        assert_eq!(change.upserts.len(), 1);
        assert_eq!(events["m"].title, "once");
    }

    #[test]
    fn this_edit_synthesizes_exception() {
        let mut events = daily_master();
        let scope = EditScope::parse("this", Some("2024-01-03T09:00:00Z")).unwrap();
        let change = SeriesEditor::new(&mut events).edit("m", &retitle("Late standup"), scope).unwrap();

        assert_eq!(change.upserts.len(), 1);
        let exception = &change.upserts[0];
        assert_eq!(exception.parent_event_id.as_deref(), Some("m"));
        assert_eq!(exception.recurring_event_id.as_deref(), Some("2024-01-03T09:00:00.000Z"));
        assert_eq!(exception.rrule, None);
        assert!(!exception.is_deleted_instance);
        assert_eq!(exception.start_at, at("2024-01-03T09:00:00Z"));
        assert_eq!(exception.title, "Late standup");
        assert_eq!(events["m"].title, "Standup");
    }

    #[test]
    fn this_edit_twice_yields_one_exception() {
        let mut events = daily_master();
        let scope = EditScope::parse("this", Some("2024-01-03T09:00:00Z")).unwrap();
        let first = SeriesEditor::new(&mut events).edit("m", &retitle("one"), scope).unwrap();
        let second = SeriesEditor::new(&mut events).edit("m", &retitle("two"), scope).unwrap();

        assert_eq!(first.upserts[0].id, second.upserts[0].id);
        let exceptions = exceptions(&events);
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].title, "two");
    }

    #[test]
    fn this_delete_marks_deleted_instance() {
        let mut events = daily_master();
        let scope = EditScope::parse("this", Some("2024-01-02T09:00:00Z")).unwrap();
        let change = SeriesEditor::new(&mut events).delete("m", scope).unwrap();
        assert!(change.deletes.is_empty());
        assert!(change.upserts[0].is_deleted_instance);

        let visible = expand_series(&events["m"], &events, at("2024-01-01T00:00:00Z"), at("2024-01-03T23:00:00Z")).unwrap();
        let starts: Vec<_> = visible.iter().map(|e| e.start_at).collect();
        assert_eq!(starts, [at("2024-01-01T09:00:00Z"), at("2024-01-03T09:00:00Z")]);
    }

    #[test]
    fn this_delete_on_existing_exception_marks_it() {
        let mut events = daily_master();
        let scope = EditScope::parse("this", Some("2024-01-02T09:00:00Z")).unwrap();
        let change = SeriesEditor::new(&mut events).edit("m", &retitle("x"), scope).unwrap();
        let id = change.upserts[0].id.clone();

        SeriesEditor::new(&mut events).delete(&id, scope).unwrap();
        assert!(events[&id].is_deleted_instance);
        assert_eq!(exceptions(&events).len(), 1);
    }

    #[test]
    fn following_delete_truncates_and_drops_later_exceptions() {
        let mut events = daily_master();
        for (day, title) in [("2024-01-02", "before"), ("2024-01-06", "after")] {
            let scope = EditScope::parse("this", Some(&format!("{day}T09:00:00Z"))).unwrap();
            SeriesEditor::new(&mut events).edit("m", &retitle(title), scope).unwrap();
        }

        let scope = EditScope::parse("following", Some("2024-01-05T09:00:00Z")).unwrap();
        let change = SeriesEditor::new(&mut events).delete("m", scope).unwrap();

        let masters: Vec<_> = events.values().filter(|e| e.is_recurring()).collect();
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0].rrule.as_deref(), Some("FREQ=DAILY;UNTIL=20240104T235959Z"));
        assert_eq!(change.deletes.len(), 1);

        let remaining = exceptions(&events);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title, "before");

        let visible = expand_series(&events["m"], &events, at("2024-01-01T00:00:00Z"), at("2024-02-01T00:00:00Z")).unwrap();
        assert_eq!(visible.len(), 4);
        assert_eq!(visible[1].title, "before");
    }

    #[test]
    fn following_edit_splits_series() {
        let mut events = daily_master();
        let scope = EditScope::parse("following", Some("2024-01-10T09:00:00Z")).unwrap();
        let change = SeriesEditor::new(&mut events).edit("m", &retitle("New standup"), scope).unwrap();

        assert_eq!(change.upserts.len(), 2);
        let old = &events["m"];
        assert_eq!(old.title, "Standup");
        assert_eq!(old.rrule.as_deref(), Some("FREQ=DAILY;UNTIL=20240109T235959Z"));

        let new_master = &change.upserts[1];
        assert_ne!(new_master.id, "m");
        assert_eq!(new_master.title, "New standup");
        assert_eq!(new_master.rrule.as_deref(), Some("FREQ=DAILY"));
        assert_eq!(new_master.start_at, at("2024-01-10T09:00:00Z"));
        assert_eq!(new_master.end_at, at("2024-01-10T09:15:00Z"));
        assert!(new_master.parent_event_id.is_none() && new_master.recurring_event_id.is_none());
    }

    #[test]
    fn following_on_non_recurring_degrades_to_all() {
        let mut events = daily_master();
        events.get_mut("m").unwrap().rrule = None;
        let scope = EditScope::parse("following", Some("2024-01-10T09:00:00Z")).unwrap();
        let change = SeriesEditor::new(&mut events).edit("m", &retitle("solo"), scope).unwrap();
        assert_eq!(change.upserts.len(), 1);
        assert_eq!(events.len(), 1);

        let change = SeriesEditor::new(&mut events).delete("m", scope).unwrap();
        assert_eq!(change.deletes, ["m"]);
        assert!(events.is_empty());
    }

    #[test]
    fn following_at_series_start_deletes_everything() {
        let mut events = daily_master();
        let scope = EditScope::parse("this", Some("2024-01-02T09:00:00Z")).unwrap();
        SeriesEditor::new(&mut events).edit("m", &retitle("x"), scope).unwrap();

        let scope = EditScope::parse("following", Some("2024-01-01T09:00:00Z")).unwrap();
        let change = SeriesEditor::new(&mut events).delete("m", scope).unwrap();
        assert_eq!(change.deletes.len(), 2);
        assert!(events.is_empty());
    }

    #[test]
    fn following_later_on_first_day_covers_whole_series() {
        let mut events = daily_master();
        events.get_mut("m").unwrap().rrule = Some("FREQ=HOURLY;INTERVAL=2".into());
        let scope = EditScope::parse("following", Some("2024-01-01T13:00:00Z")).unwrap();

        let change = SeriesEditor::new(&mut events).edit("m", &retitle("Office hours"), scope).unwrap();
        assert_eq!(change.upserts.len(), 1);
        assert_eq!(change.upserts[0].id, "m");
        assert_eq!(events["m"].rrule.as_deref(), Some("FREQ=HOURLY;INTERVAL=2"));
        assert_eq!(events["m"].title, "Office hours");

        let change = SeriesEditor::new(&mut events).delete("m", scope).unwrap();
        assert_eq!(change.deletes, ["m"]);
        assert!(events.is_empty());
    }

    #[test]
    fn unknown_target_leaves_state_untouched() {
        let mut events = daily_master();
        let before = events.clone();
        let err = SeriesEditor::new(&mut events)
            .edit("missing", &retitle("x"), EditScope::All)
            .unwrap_err();
        assert_eq!(err, SeriesEditError::UnknownEvent("missing".into()));
        assert_eq!(events, before);
    }

    #[test]
    fn invalid_rule_update_is_rejected_before_mutation() {
        let mut events = daily_master();
        let before = events.clone();
        let update = EventUpdate {
            rrule: Some("FREQ=NEVERLY".into()),
            ..Default::default()
        };
        assert!(SeriesEditor::new(&mut events).edit("m", &update, EditScope::All).is_err());
        assert_eq!(events, before);
    }
}
