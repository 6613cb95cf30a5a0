//! Two-way reconciliation of local tasks and events with Google.
//!
//! Push: every local record edited since its last successful push is sent
//! through its resource link (update, or delete-and-recreate when the target
//! container changed, or create). Tombstoned records that still have a link
//! are deleted remotely. Exceptions of a series update the matching remote
//! instance of the master.
//!
//! Pull: each container is paged to exhaustion (events use the incremental
//! sync token kept in the kv table). Remote copies that carry the same local
//! id marker are duplicates from a create whose link write was lost; all but
//! one are deleted. Surviving changes are merged into [`LocalState`] and
//! enqueued to the remote store through the [`SyncEngine`].
//!
//! A missing credential aborts the pass with
//! [`ReconcileError::CredentialMissing`]; any other failure is logged and
//! counted without stopping the batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::google_api::{EventDateTime, GoogleApi, GoogleEvent, GoogleTask};
use super::google_codec as codec;
use super::links::LinkStore;
use crate::calendar::rules;
use crate::error::ReconcileError;
use crate::model::{CalendarEvent, EntityClass, EntityId, EntityPayload, GoogleResourceLink, ResourceType, Task};
use crate::storage::{GoogleConfig, PersistError, SyncStore};
use crate::sync::{ReloadSnapshot, SyncEngine};

/// Local tasks and events the reconciler reads and writes back into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalState {
    pub tasks: BTreeMap<EntityId, Task>,
    pub events: BTreeMap<EntityId, CalendarEvent>,
}

impl LocalState {
    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks.into_iter().map(|t| (t.id.clone(), t)));
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = CalendarEvent>) -> Self {
        self.events.extend(events.into_iter().map(|e| (e.id.clone(), e)));
        self
    }

    /// Tasks and events of a merged reload.
    pub fn from_snapshot(snapshot: &ReloadSnapshot) -> Self {
        let mut state = Self::default();
        for payload in snapshot.rows(EntityClass::Task).iter().chain(snapshot.rows(EntityClass::Event)) {
            match payload {
                EntityPayload::Task(task) => {
                    state.tasks.insert(task.id.clone(), task.clone());
                }
                EntityPayload::Event(event) => {
                    state.events.insert(event.id.clone(), event.clone());
                }
                _ => {}
            }
        }
        state
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub imported: usize,
    pub duplicates_removed: usize,
    pub failures: usize,
}

enum Pushed {
    Created,
    Updated,
    Skipped,
}

fn sync_token_key(calendar_id: &str) -> String {
    format!("google.sync_token.{calendar_id}")
}

pub struct Reconciler {
    api: Arc<dyn GoogleApi>,
    store: Arc<dyn SyncStore>,
    links: LinkStore,
    config: GoogleConfig,
    /// Local list id -> Google task list id.
    task_lists: BTreeMap<EntityId, String>,
}

impl Reconciler {
    /// # Errors
    /// Returns an error if the persisted links cannot be read.
    pub fn new(api: Arc<dyn GoogleApi>, store: Arc<dyn SyncStore>, config: GoogleConfig) -> Result<Self, PersistError> {
        Ok(Self {
            api,
            links: LinkStore::open(store.clone())?,
            store,
            config,
            task_lists: BTreeMap::new(),
        })
    }

    /// Push tasks of `local_list_id` into the Google list `remote_list_id`.
    pub fn with_task_list(mut self, local_list_id: impl Into<EntityId>, remote_list_id: impl Into<String>) -> Self {
        self.task_lists.insert(local_list_id.into(), remote_list_id.into());
        self
    }

    pub fn links(&self) -> &LinkStore {
        &self.links
    }

    /// Run one push-then-pull pass.
    ///
    /// # Errors
    /// Only [`ReconcileError::CredentialMissing`]; every other failure is
    /// counted in [`ReconcileReport::failures`].
    pub async fn reconcile(
        &mut self,
        state: &mut LocalState,
        engine: &SyncEngine,
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();
        let result = self.run(state, engine, &mut report).await;
        match result {
            Ok(()) => {
                tracing::info!(?report, "google reconcile finished");
                Ok(report)
            }
            Err(e) => {
                tracing::debug!("no google credential, skipping reconcile");
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        state: &mut LocalState,
        engine: &SyncEngine,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        self.push_deletions(state, engine, report).await?;
        self.push_tasks(state, engine, report).await?;
        self.push_events(state, engine, report).await?;
        self.pull_tasks(state, engine, report).await?;
        self.pull_events(state, engine, report).await
    }

    /// Log and count a per-item failure; only a missing credential stops
    /// the pass.
    fn absorb(report: &mut ReconcileReport, what: &str, id: &str, err: ReconcileError) -> Result<(), ReconcileError> {
        if err.is_credential_missing() {
            return Err(err);
        }
        tracing::warn!(%what, %id, error = %err, "google reconcile step failed");
        report.failures += 1;
        Ok(())
    }

    fn save_link(&mut self, link: GoogleResourceLink) {
        let local_id = link.local_id.clone();
        if let Err(e) = self.links.save(link) {
            tracing::warn!(%local_id, error = %e, "could not save resource link");
        }
    }

    fn drop_link(&mut self, local_id: &str, resource_type: ResourceType) {
        if let Err(e) = self.links.remove(local_id, resource_type) {
            tracing::warn!(%local_id, error = %e, "could not remove resource link");
        }
    }

    /// Unlinked, or edited since the last successful push. Such records are
    /// pushed and never overwritten by a pulled copy.
    fn has_local_edits(&self, id: &str, resource_type: ResourceType, updated_at: Option<DateTime<Utc>>) -> bool {
        self.links
            .get(id, resource_type)
            .map_or(true, |link| link.is_stale_for(updated_at))
    }

    fn task_container(&self, task: &Task) -> String {
        task.list_id
            .as_ref()
            .and_then(|list| self.task_lists.get(list))
            .cloned()
            .unwrap_or_else(|| self.config.default_task_list_id.clone())
    }

    fn event_container(&self, event: &CalendarEvent) -> String {
        event
            .google_calendar_id
            .clone()
            .unwrap_or_else(|| self.config.default_calendar_id.clone())
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    async fn push_deletions(
        &mut self,
        state: &LocalState,
        engine: &SyncEngine,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let tombstones = engine.tombstones();
        let soft_deleted: BTreeSet<&str> = state
            .tasks
            .values()
            .filter(|t| t.is_deleted)
            .map(|t| t.id.as_str())
            .chain(state.events.values().filter(|e| e.is_deleted).map(|e| e.id.as_str()))
            .collect();

        let doomed: Vec<GoogleResourceLink> = self
            .links
            .iter()
            .filter(|l| tombstones.contains(&l.local_id) || soft_deleted.contains(l.local_id.as_str()))
            .cloned()
            .collect();

        for link in doomed {
            let result = match link.resource_type {
                ResourceType::GoogleTask => self.api.delete_task(&link.container_id, &link.remote_id).await,
                ResourceType::GoogleEvent => self.api.delete_event(&link.container_id, &link.remote_id).await,
            };
            match result {
                Ok(()) => {
                    self.drop_link(&link.local_id, link.resource_type);
                    report.deleted += 1;
                }
                Err(e) => Self::absorb(report, "delete", &link.local_id, e)?,
            }
        }
        Ok(())
    }

    async fn push_tasks(
        &mut self,
        state: &LocalState,
        engine: &SyncEngine,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let pending: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| !t.is_deleted && !engine.is_tombstoned(&t.id))
            .filter(|t| self.has_local_edits(&t.id, ResourceType::GoogleTask, t.updated_at))
            .cloned()
            .collect();

        for task in pending {
            match self.push_task(&task).await {
                Ok(Pushed::Created) => report.created += 1,
                Ok(Pushed::Updated) => report.updated += 1,
                Ok(Pushed::Skipped) => {}
                Err(e) => Self::absorb(report, "push task", &task.id, e)?,
            }
        }
        Ok(())
    }

    async fn push_task(&mut self, task: &Task) -> Result<Pushed, ReconcileError> {
        let container = self.task_container(task);
        let body = codec::task_to_google(task);

        if let Some(link) = self.links.get(&task.id, ResourceType::GoogleTask).cloned() {
            if link.container_id == container {
                self.api.update_task(&container, &link.remote_id, &body).await?;
                self.save_link(GoogleResourceLink::new(&task.id, ResourceType::GoogleTask, link.remote_id, container));
                return Ok(Pushed::Updated);
            }
            tracing::debug!(id = %task.id, from = %link.container_id, to = %container, "task moved lists");
            self.api.delete_task(&link.container_id, &link.remote_id).await?;
            self.drop_link(&task.id, ResourceType::GoogleTask);
        }

        let created = self.api.insert_task(&container, &body).await?;
        let remote_id = created.id.ok_or_else(|| ReconcileError::Api {
            status: None,
            message: "created task has no id".into(),
        })?;
        self.save_link(GoogleResourceLink::new(&task.id, ResourceType::GoogleTask, remote_id, container));
        Ok(Pushed::Created)
    }

    async fn push_events(
        &mut self,
        state: &mut LocalState,
        engine: &SyncEngine,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let mut pending: Vec<CalendarEvent> = state
            .events
            .values()
            .filter(|e| !e.is_deleted && !engine.is_tombstoned(&e.id) && !e.is_google_task)
            .filter(|e| self.has_local_edits(&e.id, ResourceType::GoogleEvent, e.updated_at))
            .cloned()
            .collect();
        // Masters before exceptions so instance lookups find a linked master.
        pending.sort_by_key(CalendarEvent::is_exception);

        for event in pending {
            let result = if event.is_exception() {
                self.push_exception(&event).await
            } else {
                self.push_event(&event).await
            };
            match result {
                Ok(Pushed::Created) => report.created += 1,
                Ok(Pushed::Updated) => report.updated += 1,
                Ok(Pushed::Skipped) => {}
                Err(e) => Self::absorb(report, "push event", &event.id, e)?,
            }
            self.write_back_event_ids(&event.id, state, engine);
        }
        Ok(())
    }

    async fn push_event(&mut self, event: &CalendarEvent) -> Result<Pushed, ReconcileError> {
        let container = self.event_container(event);
        let body = codec::event_to_google(event);

        if let Some(link) = self.links.get(&event.id, ResourceType::GoogleEvent).cloned() {
            if link.container_id == container {
                self.api.update_event(&container, &link.remote_id, &body).await?;
                self.save_link(GoogleResourceLink::new(&event.id, ResourceType::GoogleEvent, link.remote_id, container));
                return Ok(Pushed::Updated);
            }
            tracing::debug!(id = %event.id, from = %link.container_id, to = %container, "event moved calendars");
            self.api.delete_event(&link.container_id, &link.remote_id).await?;
            self.drop_link(&event.id, ResourceType::GoogleEvent);
        }

        let created = self.api.insert_event(&container, &body).await?;
        let remote_id = created.id.ok_or_else(|| ReconcileError::Api {
            status: None,
            message: "created event has no id".into(),
        })?;
        self.save_link(GoogleResourceLink::new(&event.id, ResourceType::GoogleEvent, remote_id, container));
        Ok(Pushed::Created)
    }

    /// Update (or cancel) the remote instance an exception overrides.
    async fn push_exception(&mut self, exception: &CalendarEvent) -> Result<Pushed, ReconcileError> {
        let master_id = exception.master_id().to_string();
        let Some(master) = self.links.get(&master_id, ResourceType::GoogleEvent).cloned() else {
            tracing::debug!(id = %exception.id, master = %master_id, "series master not linked yet");
            return Ok(Pushed::Skipped);
        };

        let known = self.links.get(&exception.id, ResourceType::GoogleEvent).cloned();
        let instance = match known {
            Some(link) if link.container_id == master.container_id => {
                let mut instance = GoogleEvent {
                    id: Some(link.remote_id),
                    ..Default::default()
                };
                instance.original_start_time = exception
                    .recurring_event_id
                    .as_deref()
                    .and_then(rules::parse_occurrence)
                    .map(|at| EventDateTime::at(at, None));
                instance
            }
            _ => self
                .api
                .list_instances(&master.container_id, &master.remote_id)
                .await?
                .into_iter()
                .find(|i| codec::is_instance_of(i, exception))
                .ok_or_else(|| ReconcileError::Api {
                    status: None,
                    message: format!(
                        "no remote instance at {}",
                        exception.recurring_event_id.as_deref().unwrap_or_default()
                    ),
                })?,
        };
        let instance_id = instance.id.clone().ok_or_else(|| ReconcileError::Api {
            status: None,
            message: "remote instance has no id".into(),
        })?;

        let mut body = codec::event_to_google(exception);
        body.recurring_event_id = Some(master.remote_id.clone());
        body.original_start_time = instance.original_start_time;
        self.api.update_event(&master.container_id, &instance_id, &body).await?;
        self.save_link(GoogleResourceLink::new(
            &exception.id,
            ResourceType::GoogleEvent,
            instance_id,
            master.container_id,
        ));
        Ok(Pushed::Updated)
    }

    /// Record the remote id on the local event so the remote store carries it.
    fn write_back_event_ids(&self, id: &str, state: &mut LocalState, engine: &SyncEngine) {
        let Some(link) = self.links.get(id, ResourceType::GoogleEvent) else {
            return;
        };
        let Some(event) = state.events.get_mut(id) else {
            return;
        };
        if event.google_event_id.as_deref() == Some(link.remote_id.as_str())
            && event.google_calendar_id.as_deref() == Some(link.container_id.as_str())
        {
            return;
        }
        event.google_event_id = Some(link.remote_id.clone());
        event.google_calendar_id = Some(link.container_id.clone());
        engine.upsert_entity(event.clone());
    }

    // ------------------------------------------------------------------
    // Pull
    // ------------------------------------------------------------------

    async fn pull_tasks(
        &mut self,
        state: &mut LocalState,
        engine: &SyncEngine,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let mut containers: BTreeSet<String> = self.task_lists.values().cloned().collect();
        containers.insert(self.config.default_task_list_id.clone());
        containers.extend(
            self.links
                .iter()
                .filter(|l| l.resource_type == ResourceType::GoogleTask)
                .map(|l| l.container_id.clone()),
        );

        for list_id in containers {
            let mut items = Vec::new();
            let mut page_token: Option<String> = None;
            let listed = loop {
                match self.api.list_tasks(&list_id, page_token.as_deref()).await {
                    Ok(page) => {
                        items.extend(page.items);
                        match page.next_page_token {
                            Some(next) => page_token = Some(next),
                            None => break Ok(()),
                        }
                    }
                    Err(e) => break Err(e),
                }
            };
            match listed {
                Ok(()) => self.merge_tasks(&list_id, items, state, engine, report).await?,
                Err(e) => Self::absorb(report, "list tasks", &list_id, e)?,
            }
        }
        Ok(())
    }

    async fn merge_tasks(
        &mut self,
        list_id: &str,
        items: Vec<GoogleTask>,
        state: &mut LocalState,
        engine: &SyncEngine,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let mut keep: Vec<GoogleTask> = Vec::new();
        let mut by_marker: HashMap<String, Vec<GoogleTask>> = HashMap::new();
        for item in items {
            let marker = codec::task_local_id(&item)
                .filter(|_| !item.deleted)
                .map(String::from);
            match marker {
                Some(marker) => by_marker.entry(marker).or_default().push(item),
                None => keep.push(item),
            }
        }

        for (local_id, copies) in by_marker {
            let linked = self
                .links
                .get(&local_id, ResourceType::GoogleTask)
                .map(|l| l.remote_id.clone());
            let (winner, losers) = pick_survivor(copies, linked.as_deref(), |t| (t.id.as_deref(), t.updated));
            for loser in losers {
                let Some(remote_id) = loser.id.as_deref() else { continue };
                match self.api.delete_task(list_id, remote_id).await {
                    Ok(()) => report.duplicates_removed += 1,
                    Err(e) => Self::absorb(report, "delete duplicate task", remote_id, e)?,
                }
            }
            if let Some(remote_id) = winner.id.as_deref() {
                if linked.as_deref() != Some(remote_id) && state.tasks.contains_key(&local_id) {
                    self.save_link(GoogleResourceLink::new(&local_id, ResourceType::GoogleTask, remote_id, list_id));
                }
            }
            keep.push(winner);
        }

        let local_list = self
            .task_lists
            .iter()
            .find(|(_, remote)| remote.as_str() == list_id)
            .map(|(local, _)| local.clone());

        for remote in keep {
            let Some(remote_id) = remote.id.clone() else { continue };
            let known = self
                .links
                .by_remote(ResourceType::GoogleTask, &remote_id)
                .map(|l| l.local_id.clone());

            if remote.deleted {
                if let Some(local_id) = known {
                    self.drop_link(&local_id, ResourceType::GoogleTask);
                    if state.tasks.remove(&local_id).is_some() {
                        engine.delete(EntityClass::Task, local_id);
                        report.deleted += 1;
                    }
                }
                continue;
            }

            let local_id = known
                .or_else(|| codec::task_local_id(&remote).map(String::from).filter(|id| state.tasks.contains_key(id)))
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            if engine.is_tombstoned(&local_id) || engine.has_pending_delete(&local_id) {
                continue;
            }

            let existing = state.tasks.get(&local_id);
            if let Some(local) = existing {
                if self.has_local_edits(&local_id, ResourceType::GoogleTask, local.updated_at) {
                    continue;
                }
            }
            let mut merged = codec::google_to_task(&remote, &local_id, existing);
            if existing.is_none() {
                merged.list_id = local_list.clone();
            }
            if existing.is_some_and(|local| same_ignoring_stamp_task(local, &merged)) {
                continue;
            }

            state.tasks.insert(local_id.clone(), merged.clone());
            engine.upsert_entity(merged);
            self.save_link(GoogleResourceLink::new(&local_id, ResourceType::GoogleTask, remote_id, list_id));
            report.imported += 1;
        }
        Ok(())
    }

    async fn pull_events(
        &mut self,
        state: &mut LocalState,
        engine: &SyncEngine,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let mut calendars: BTreeSet<String> = BTreeSet::new();
        calendars.insert(self.config.default_calendar_id.clone());
        calendars.extend(
            self.links
                .iter()
                .filter(|l| l.resource_type == ResourceType::GoogleEvent)
                .map(|l| l.container_id.clone()),
        );

        for calendar_id in calendars {
            match self.list_calendar(&calendar_id).await {
                Ok((items, next_sync)) => {
                    self.merge_events(&calendar_id, items, state, engine, report).await?;
                    if let Some(token) = next_sync {
                        if let Err(e) = self.store.kv_set(&sync_token_key(&calendar_id), Some(&token)) {
                            tracing::warn!(calendar = %calendar_id, error = %e, "could not store sync token");
                        }
                    }
                }
                Err(e) => Self::absorb(report, "list events", &calendar_id, e)?,
            }
        }
        Ok(())
    }

    /// Page through one calendar. An expired sync token is cleared and the
    /// listing restarts in full.
    async fn list_calendar(&self, calendar_id: &str) -> Result<(Vec<GoogleEvent>, Option<String>), ReconcileError> {
        let key = sync_token_key(calendar_id);
        let mut sync_token = self.store.kv_get(&key).unwrap_or_else(|e| {
            tracing::warn!(calendar = %calendar_id, error = %e, "could not read sync token");
            None
        });
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            match self
                .api
                .list_events(calendar_id, page_token.as_deref(), sync_token.as_deref())
                .await
            {
                Ok(page) => {
                    items.extend(page.items);
                    match page.next_page_token {
                        Some(next) => page_token = Some(next),
                        None => return Ok((items, page.next_sync_token)),
                    }
                }
                Err(ReconcileError::SyncTokenExpired) if sync_token.is_some() => {
                    tracing::info!(calendar = %calendar_id, "sync token expired, relisting");
                    if let Err(e) = self.store.kv_set(&key, None) {
                        tracing::warn!(calendar = %calendar_id, error = %e, "could not clear sync token");
                    }
                    sync_token = None;
                    page_token = None;
                    items.clear();
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn merge_events(
        &mut self,
        calendar_id: &str,
        items: Vec<GoogleEvent>,
        state: &mut LocalState,
        engine: &SyncEngine,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        // Instances inherit the master's private properties, so only
        // standalone events and masters are grouped by marker.
        let mut keep: Vec<GoogleEvent> = Vec::new();
        let mut by_marker: HashMap<String, Vec<GoogleEvent>> = HashMap::new();
        for item in items {
            let marker = codec::event_local_id(&item)
                .filter(|_| item.recurring_event_id.is_none() && !item.is_cancelled())
                .map(String::from);
            match marker {
                Some(marker) => by_marker.entry(marker).or_default().push(item),
                None => keep.push(item),
            }
        }

        for (local_id, copies) in by_marker {
            let linked = self
                .links
                .get(&local_id, ResourceType::GoogleEvent)
                .map(|l| l.remote_id.clone());
            let (winner, losers) = pick_survivor(copies, linked.as_deref(), |e| (e.id.as_deref(), e.updated));
            for loser in losers {
                let Some(remote_id) = loser.id.as_deref() else { continue };
                match self.api.delete_event(calendar_id, remote_id).await {
                    Ok(()) => report.duplicates_removed += 1,
                    Err(e) => Self::absorb(report, "delete duplicate event", remote_id, e)?,
                }
            }
            if let Some(remote_id) = winner.id.as_deref() {
                if linked.as_deref() != Some(remote_id) && state.events.contains_key(&local_id) {
                    self.save_link(GoogleResourceLink::new(&local_id, ResourceType::GoogleEvent, remote_id, calendar_id));
                }
            }
            keep.push(winner);
        }

        keep.sort_by_key(|e| e.recurring_event_id.is_some());
        for remote in keep {
            self.merge_event(calendar_id, remote, state, engine, report);
        }
        Ok(())
    }

    fn merge_event(
        &mut self,
        calendar_id: &str,
        remote: GoogleEvent,
        state: &mut LocalState,
        engine: &SyncEngine,
        report: &mut ReconcileReport,
    ) {
        let Some(remote_id) = remote.id.clone() else { return };
        let known = self
            .links
            .by_remote(ResourceType::GoogleEvent, &remote_id)
            .map(|l| l.local_id.clone());

        // Series linkage for instances.
        let parent = match remote.recurring_event_id.as_deref() {
            Some(master_remote) => match self.links.by_remote(ResourceType::GoogleEvent, master_remote) {
                Some(link) => Some((link.local_id.clone(), codec::original_start_key(&remote))),
                None => return,
            },
            None => None,
        };

        if remote.is_cancelled() && parent.is_none() {
            if let Some(local_id) = known {
                self.drop_link(&local_id, ResourceType::GoogleEvent);
                if state.events.remove(&local_id).is_some() {
                    engine.delete(EntityClass::Event, local_id);
                    report.deleted += 1;
                }
            }
            return;
        }

        let local_id = known
            .or_else(|| {
                let (master, key) = parent.as_ref()?;
                state
                    .events
                    .values()
                    .find(|e| e.parent_event_id.as_deref() == Some(master.as_str()) && e.recurring_event_id == *key)
                    .map(|e| e.id.clone())
            })
            .or_else(|| {
                codec::event_local_id(&remote)
                    .filter(|_| parent.is_none())
                    .map(String::from)
                    .filter(|id| state.events.contains_key(id))
            })
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if engine.is_tombstoned(&local_id) || engine.has_pending_delete(&local_id) {
            return;
        }

        let existing = state.events.get(&local_id);
        if let Some(local) = existing {
            if self.has_local_edits(&local_id, ResourceType::GoogleEvent, local.updated_at) {
                return;
            }
        }

        let seed = match (&parent, existing) {
            (Some((master, key)), None) => Some(CalendarEvent {
                id: local_id.clone(),
                parent_event_id: Some(master.clone()),
                recurring_event_id: key.clone(),
                created_at: Some(Utc::now()),
                ..Default::default()
            }),
            _ => existing.cloned(),
        };
        let Some(mut merged) = codec::google_to_event(&remote, &local_id, calendar_id, seed.as_ref()) else {
            tracing::warn!(remote = %remote_id, "skipping remote event without a start");
            return;
        };
        if parent.is_some() {
            merged.rrule = None;
        }
        if existing.is_some_and(|local| same_ignoring_stamp_event(local, &merged)) {
            return;
        }

        state.events.insert(local_id.clone(), merged.clone());
        engine.upsert_entity(merged);
        self.save_link(GoogleResourceLink::new(&local_id, ResourceType::GoogleEvent, remote_id, calendar_id));
        report.imported += 1;
    }
}

/// Keep the linked copy if present, otherwise the most recently updated.
fn pick_survivor<T, F>(mut copies: Vec<T>, linked: Option<&str>, key: F) -> (T, Vec<T>)
where
    F: Fn(&T) -> (Option<&str>, Option<DateTime<Utc>>),
{
    let mut best = 0;
    for (i, copy) in copies.iter().enumerate() {
        let (id, updated) = key(copy);
        if linked.is_some() && id == linked {
            best = i;
            break;
        }
        if codec::newer(updated, key(&copies[best]).1) {
            best = i;
        }
    }
    let winner = copies.swap_remove(best);
    (winner, copies)
}

fn same_ignoring_stamp_task(a: &Task, b: &Task) -> bool {
    Task {
        updated_at: None,
        ..a.clone()
    } == Task {
        updated_at: None,
        ..b.clone()
    }
}

fn same_ignoring_stamp_event(a: &CalendarEvent, b: &CalendarEvent) -> bool {
    CalendarEvent {
        updated_at: None,
        ..a.clone()
    } == CalendarEvent {
        updated_at: None,
        ..b.clone()
    }
}
