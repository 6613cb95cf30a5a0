//! Conversion between local entities and Google resources.
//!
//! Every resource we create carries the local id: events in the private
//! extended property [`LOCAL_ID_PROPERTY`], tasks in a trailing notes footer.

use chrono::{DateTime, Duration, Utc};

use super::google_api::{
    EventDateTime, ExtendedProperties, GoogleAttendee, GoogleEvent, GoogleReminderOverride, GoogleReminders,
    GoogleTask,
};
use crate::calendar::rules;
use crate::model::{Attendee, CalendarEvent, ReminderOverride, Reminders, Task};

pub const LOCAL_ID_PROPERTY: &str = "offsyncId";
const FOOTER_PREFIX: &str = "[offsync:";

// ============================================================================
// Events
// ============================================================================

pub fn event_to_google(event: &CalendarEvent) -> GoogleEvent {
    let (start, end) = if event.is_all_day {
        let start = event.start_at.date_naive();
        let mut end = event.end_at.date_naive();
        if end <= start {
            end = start + Duration::days(1);
        }
        (EventDateTime::all_day(start), EventDateTime::all_day(end))
    } else {
        (
            EventDateTime::at(event.start_at, event.timezone.clone()),
            EventDateTime::at(event.end_at, event.timezone.clone()),
        )
    };

    let recurrence = match (&event.rrule, event.is_exception()) {
        (Some(rule), false) if event.is_recurring() => vec![format!("RRULE:{}", rules::normalize(rule))],
        _ => Vec::new(),
    };

    let mut properties = ExtendedProperties::default();
    properties
        .private
        .insert(LOCAL_ID_PROPERTY.to_string(), event.id.clone());

    GoogleEvent {
        status: Some(if event.is_deleted_instance { "cancelled" } else { "confirmed" }.to_string()),
        summary: Some(event.title.clone()),
        description: event.description.clone(),
        location: event.location.clone(),
        start,
        end,
        recurrence,
        attendees: event
            .attendees
            .iter()
            .map(|a| GoogleAttendee {
                email: a.email.clone(),
                display_name: a.display_name.clone(),
                response_status: a.response_status.clone(),
                optional: a.optional,
            })
            .collect(),
        conference_data: event.conference_data.clone(),
        reminders: event.reminders.as_ref().map(|r| GoogleReminders {
            use_default: r.use_default,
            overrides: r
                .overrides
                .iter()
                .map(|o| GoogleReminderOverride {
                    method: o.method.clone(),
                    minutes: o.minutes,
                })
                .collect(),
        }),
        color_id: event.color_id.clone(),
        visibility: event.visibility.clone(),
        transparency: event.transparency.clone(),
        extended_properties: Some(properties),
        ..Default::default()
    }
}

/// Merge a remote event into a local record. `existing` supplies the fields
/// Google does not carry. Returns `None` when the remote start is unreadable.
pub fn google_to_event(
    remote: &GoogleEvent,
    local_id: &str,
    calendar_id: &str,
    existing: Option<&CalendarEvent>,
) -> Option<CalendarEvent> {
    let start_at = remote.start.instant()?;
    let end_at = remote.end.instant().unwrap_or(start_at);
    let mut event = existing.cloned().unwrap_or_else(|| CalendarEvent {
        id: local_id.to_string(),
        created_at: Some(Utc::now()),
        ..Default::default()
    });

    event.title = remote.summary.clone().unwrap_or_default();
    event.description = remote.description.clone();
    event.location = remote.location.clone();
    event.start_at = start_at;
    event.end_at = end_at;
    event.is_all_day = remote.start.date.is_some();
    event.timezone = remote.start.time_zone.clone().or(event.timezone.take());
    if !event.is_exception() {
        event.rrule = remote
            .recurrence
            .iter()
            .find(|line| line.starts_with("RRULE:"))
            .map(|line| rules::normalize(line).to_string());
    }
    event.attendees = remote
        .attendees
        .iter()
        .map(|a| Attendee {
            email: a.email.clone(),
            display_name: a.display_name.clone(),
            response_status: a.response_status.clone(),
            optional: a.optional,
        })
        .collect();
    event.conference_data = remote.conference_data.clone();
    event.reminders = remote.reminders.as_ref().map(|r| Reminders {
        use_default: r.use_default,
        overrides: r
            .overrides
            .iter()
            .map(|o| ReminderOverride {
                method: o.method.clone(),
                minutes: o.minutes,
            })
            .collect(),
    });
    event.color_id = remote.color_id.clone();
    event.visibility = remote.visibility.clone();
    event.transparency = remote.transparency.clone();
    event.is_deleted_instance = remote.is_cancelled() && event.is_exception();
    event.google_event_id = remote.id.clone();
    event.google_calendar_id = Some(calendar_id.to_string());
    event.updated_at = Some(remote.updated.unwrap_or_else(Utc::now));
    Some(event)
}

/// Join key of the occurrence a remote instance replaces.
pub fn original_start_key(remote: &GoogleEvent) -> Option<String> {
    remote
        .original_start_time
        .as_ref()
        .and_then(EventDateTime::instant)
        .map(rules::occurrence_key)
}

/// Whether a remote instance is the occurrence an exception overrides.
pub fn is_instance_of(remote: &GoogleEvent, exception: &CalendarEvent) -> bool {
    let Some(original) = exception.recurring_event_id.as_deref().and_then(rules::parse_occurrence) else {
        return false;
    };
    remote
        .original_start_time
        .as_ref()
        .and_then(EventDateTime::instant)
        .is_some_and(|start| start == original)
}

pub fn event_local_id(remote: &GoogleEvent) -> Option<&str> {
    remote.private_property(LOCAL_ID_PROPERTY)
}

// ============================================================================
// Tasks
// ============================================================================

pub fn task_to_google(task: &Task) -> GoogleTask {
    let footer = format!("{FOOTER_PREFIX}{}]", task.id);
    let notes = match task.description.as_deref().map(str::trim_end) {
        Some(body) if !body.is_empty() => format!("{body}\n\n{footer}"),
        _ => footer,
    };

    GoogleTask {
        title: task.title.clone(),
        notes: Some(notes),
        status: Some(if task.is_completed { "completed" } else { "needsAction" }.to_string()),
        due: task.scheduled_at,
        completed: if task.is_completed { task.completed_at } else { None },
        ..Default::default()
    }
}

pub fn google_to_task(remote: &GoogleTask, local_id: &str, existing: Option<&Task>) -> Task {
    let mut task = existing.cloned().unwrap_or_else(|| Task {
        id: local_id.to_string(),
        created_at: Some(Utc::now()),
        ..Default::default()
    });

    task.title = remote.title.clone();
    task.description = remote.notes.as_deref().and_then(strip_footer);
    task.is_completed = remote.status.as_deref() == Some("completed");
    task.completed_at = if task.is_completed { remote.completed.or(task.completed_at) } else { None };
    task.scheduled_at = remote.due;
    task.updated_at = Some(remote.updated.unwrap_or_else(Utc::now));
    task
}

/// Local id recorded in a notes footer.
pub fn task_local_id(remote: &GoogleTask) -> Option<&str> {
    let notes = remote.notes.as_deref()?;
    let start = notes.rfind(FOOTER_PREFIX)? + FOOTER_PREFIX.len();
    let rest = &notes[start..];
    let end = rest.find(']')?;
    Some(&rest[..end]).filter(|id| !id.is_empty())
}

fn strip_footer(notes: &str) -> Option<String> {
    let body = match notes.rfind(FOOTER_PREFIX) {
        Some(at) => &notes[..at],
        None => notes,
    };
    Some(body.trim_end().to_string()).filter(|b| !b.is_empty())
}

/// Tie-breaker between duplicate remote copies: the most recently updated.
pub fn newer(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    a.unwrap_or(DateTime::<Utc>::MIN_UTC) > b.unwrap_or(DateTime::<Utc>::MIN_UTC)
}
