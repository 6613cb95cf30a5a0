//! Scoped series edits flowing through the operation log to the remote
//! store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use offsync_core::calendar::{expand_series, rules};
use offsync_core::storage::{DispatcherConfig, MemoryStore};
use offsync_core::sync::{CollectingNotifier, MemoryRemote, SyncEngine};
use offsync_core::{CalendarEvent, EditScope, EntityClass, EntityPayload, EventUpdate, SeriesEditor};

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn standup() -> CalendarEvent {
    CalendarEvent {
        id: "standup".into(),
        title: "Standup".into(),
        start_at: at(2024, 4, 1, 9),
        end_at: at(2024, 4, 1, 9) + Duration::minutes(15),
        rrule: Some("FREQ=DAILY".into()),
        ..Default::default()
    }
}

fn engine() -> (SyncEngine, Arc<MemoryRemote>) {
    let remote = Arc::new(MemoryRemote::new());
    let engine = SyncEngine::open(
        Arc::new(MemoryStore::new()),
        remote.clone(),
        Arc::new(CollectingNotifier::new()),
        DispatcherConfig::default(),
    )
    .unwrap();
    (engine, remote)
}

fn remote_event(remote: &MemoryRemote, id: &str) -> Option<CalendarEvent> {
    match remote.get(EntityClass::Event, id) {
        Some(EntityPayload::Event(e)) => Some(e),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn following_edit_splits_series_remotely() {
    let (engine, remote) = engine();
    let mut events = BTreeMap::from([("standup".to_string(), standup())]);

    let split = at(2024, 4, 10, 9);
    let scope = EditScope::parse("following", Some(&rules::occurrence_key(split))).unwrap();
    let update = EventUpdate {
        title: Some("Standup (new room)".into()),
        ..Default::default()
    };
    let change = SeriesEditor::new(&mut events).edit("standup", &update, scope).unwrap();
    assert_eq!(change.upserts.len(), 2);
    change.enqueue(&engine);
    engine.process().await;

    let old = remote_event(&remote, "standup").unwrap();
    assert_eq!(old.title, "Standup");
    assert!(old.rrule.as_deref().unwrap().contains("UNTIL=20240409T235959Z"));

    let new_master = events
        .values()
        .find(|e| e.id != "standup")
        .cloned()
        .unwrap();
    let pushed = remote_event(&remote, &new_master.id).unwrap();
    assert_eq!(pushed.title, "Standup (new room)");
    assert_eq!(pushed.start_at, split);
    assert_eq!(pushed.rrule.as_deref(), Some("FREQ=DAILY"));
    assert!(pushed.parent_event_id.is_none());

    let before: Vec<_> = expand_series(&old, &events, at(2024, 4, 1, 0), at(2024, 4, 20, 0))
        .unwrap()
        .into_iter()
        .map(|o| o.start_at)
        .collect();
    assert_eq!(before.last().copied(), Some(at(2024, 4, 9, 9)));
}

#[tokio::test(start_paused = true)]
async fn this_delete_hides_one_occurrence() {
    let (engine, remote) = engine();
    let mut events = BTreeMap::from([("standup".to_string(), standup())]);

    let skipped = at(2024, 4, 3, 9);
    let scope = EditScope::parse("this", Some(&rules::occurrence_key(skipped))).unwrap();
    SeriesEditor::new(&mut events)
        .delete("standup", scope)
        .unwrap()
        .enqueue(&engine);
    engine.process().await;

    let exception = events.values().find(|e| e.is_exception()).cloned().unwrap();
    let pushed = remote_event(&remote, &exception.id).unwrap();
    assert!(pushed.is_deleted_instance);
    assert_eq!(pushed.parent_event_id.as_deref(), Some("standup"));

    let starts: Vec<_> = expand_series(&events["standup"], &events, at(2024, 4, 1, 0), at(2024, 4, 4, 23))
        .unwrap()
        .into_iter()
        .map(|o| o.start_at)
        .collect();
    assert_eq!(starts, vec![at(2024, 4, 1, 9), at(2024, 4, 2, 9), at(2024, 4, 4, 9)]);
}

#[tokio::test(start_paused = true)]
async fn missing_original_start_changes_nothing() {
    let (engine, _) = engine();
    let mut events = BTreeMap::from([("standup".to_string(), standup())]);

    for (mode, original) in [("following", None), ("this", Some("not a time")), ("sometimes", Some("2024-04-02T09:00:00.000Z"))] {
        let result = EditScope::parse(mode, original)
            .and_then(|scope| SeriesEditor::new(&mut events).delete("standup", scope));
        assert!(result.is_err(), "{mode} should be rejected");
    }
    assert_eq!(events.len(), 1);
    assert_eq!(events["standup"], standup());
    assert!(engine.pending().is_empty());
}
