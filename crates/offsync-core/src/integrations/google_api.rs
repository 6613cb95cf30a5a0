//! Google Calendar v3 and Tasks v1 REST client.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::oauth::TokenSource;
use crate::error::ReconcileError;
use crate::storage::GoogleConfig;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleCalendar {
    pub id: String,
    pub summary: String,
    pub primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleTaskList {
    pub id: String,
    pub title: String,
}

/// `start`, `end` and `originalStartTime` of an event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventDateTime {
    pub fn at(instant: DateTime<Utc>, time_zone: Option<String>) -> Self {
        Self {
            date_time: Some(instant),
            date: None,
            time_zone,
        }
    }

    pub fn all_day(date: NaiveDate) -> Self {
        Self {
            date_time: None,
            date: Some(date),
            time_zone: None,
        }
    }

    /// The instant, with all-day dates read as midnight UTC.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        self.date_time
            .or_else(|| self.date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| n.and_utc()))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleAttendee {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleReminderOverride {
    pub method: String,
    pub minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleReminders {
    pub use_default: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<GoogleReminderOverride>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendedProperties {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub private: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// "confirmed", "tentative" or "cancelled".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recurrence: Vec<String>,
    /// Remote id of the master, set on instances.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_start_time: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<GoogleAttendee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conference_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<GoogleReminders>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<ExtendedProperties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl GoogleEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    pub fn private_property(&self, key: &str) -> Option<&str> {
        self.extended_properties
            .as_ref()
            .and_then(|p| p.private.get(key))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// "needsAction" or "completed".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

/// One page of a list call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub next_sync_token: Option<String>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_page_token: None,
            next_sync_token: None,
        }
    }
}

/// The subset of the Calendar and Tasks APIs the reconciler needs.
#[async_trait]
pub trait GoogleApi: Send + Sync {
    async fn list_calendars(&self) -> Result<Vec<GoogleCalendar>, ReconcileError>;

    async fn list_task_lists(&self) -> Result<Vec<GoogleTaskList>, ReconcileError>;

    /// One page of events. With a `sync_token`, only changes since it; an
    /// expired token yields [`ReconcileError::SyncTokenExpired`].
    async fn list_events(
        &self,
        calendar_id: &str,
        page_token: Option<&str>,
        sync_token: Option<&str>,
    ) -> Result<Page<GoogleEvent>, ReconcileError>;

    /// Every expanded instance of a recurring event.
    async fn list_instances(&self, calendar_id: &str, event_id: &str) -> Result<Vec<GoogleEvent>, ReconcileError>;

    async fn insert_event(&self, calendar_id: &str, event: &GoogleEvent) -> Result<GoogleEvent, ReconcileError>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, ReconcileError>;

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), ReconcileError>;

    async fn list_tasks(&self, list_id: &str, page_token: Option<&str>) -> Result<Page<GoogleTask>, ReconcileError>;

    async fn insert_task(&self, list_id: &str, task: &GoogleTask) -> Result<GoogleTask, ReconcileError>;

    async fn update_task(&self, list_id: &str, task_id: &str, task: &GoogleTask) -> Result<GoogleTask, ReconcileError>;

    async fn delete_task(&self, list_id: &str, task_id: &str) -> Result<(), ReconcileError>;
}

/// HTTP implementation of [`GoogleApi`].
pub struct GoogleClient {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    api_base: String,
    tasks_api_base: String,
}

fn enc(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

impl GoogleClient {
    pub fn new(config: &GoogleConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http: Client::new(),
            tokens,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            tasks_api_base: config.tasks_api_base.trim_end_matches('/').to_string(),
        }
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.api_base, enc(calendar_id))
    }

    fn tasks_url(&self, list_id: &str) -> String {
        format!("{}/lists/{}/tasks", self.tasks_api_base, enc(list_id))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ReconcileError> {
        let token = self.tokens.access_token().await?;
        let resp = builder.bearer_auth(token).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED => Err(ReconcileError::CredentialMissing),
            StatusCode::GONE => Err(ReconcileError::SyncTokenExpired),
            status => {
                let message = resp.text().await.unwrap_or_default();
                Err(ReconcileError::Api {
                    status: Some(status.as_u16()),
                    message,
                })
            }
        }
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ReconcileError> {
        Ok(self.send(builder).await?.json().await?)
    }

    /// Deletes treat "already gone" as success.
    async fn delete(&self, url: String) -> Result<(), ReconcileError> {
        match self.send(self.http.delete(url)).await {
            Ok(_) => Ok(()),
            Err(ReconcileError::Api {
                status: Some(404),
                ..
            })
            | Err(ReconcileError::SyncTokenExpired) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn all_pages<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, ReconcileError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self.http.get(url);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let page: Page<T> = self.json(req).await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(items),
            }
        }
    }
}

#[async_trait]
impl GoogleApi for GoogleClient {
    async fn list_calendars(&self) -> Result<Vec<GoogleCalendar>, ReconcileError> {
        self.all_pages(&format!("{}/users/me/calendarList", self.api_base)).await
    }

    async fn list_task_lists(&self) -> Result<Vec<GoogleTaskList>, ReconcileError> {
        self.all_pages(&format!("{}/users/@me/lists", self.tasks_api_base)).await
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        page_token: Option<&str>,
        sync_token: Option<&str>,
    ) -> Result<Page<GoogleEvent>, ReconcileError> {
        let mut query: Vec<(&str, &str)> = vec![("showDeleted", "true"), ("maxResults", "250")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        if let Some(token) = sync_token {
            query.push(("syncToken", token));
        }
        self.json(self.http.get(self.events_url(calendar_id)).query(&query)).await
    }

    async fn list_instances(&self, calendar_id: &str, event_id: &str) -> Result<Vec<GoogleEvent>, ReconcileError> {
        let url = format!("{}/{}/instances", self.events_url(calendar_id), enc(event_id));
        self.all_pages(&url).await
    }

    async fn insert_event(&self, calendar_id: &str, event: &GoogleEvent) -> Result<GoogleEvent, ReconcileError> {
        let req = self
            .http
            .post(self.events_url(calendar_id))
            .query(&[("conferenceDataVersion", "1")])
            .json(event);
        self.json(req).await
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, ReconcileError> {
        let url = format!("{}/{}", self.events_url(calendar_id), enc(event_id));
        let req = self
            .http
            .put(url)
            .query(&[("conferenceDataVersion", "1")])
            .json(event);
        self.json(req).await
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), ReconcileError> {
        self.delete(format!("{}/{}", self.events_url(calendar_id), enc(event_id)))
            .await
    }

    async fn list_tasks(&self, list_id: &str, page_token: Option<&str>) -> Result<Page<GoogleTask>, ReconcileError> {
        let mut query: Vec<(&str, &str)> = vec![("showCompleted", "true"), ("showHidden", "true"), ("maxResults", "100")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.json(self.http.get(self.tasks_url(list_id)).query(&query)).await
    }

    async fn insert_task(&self, list_id: &str, task: &GoogleTask) -> Result<GoogleTask, ReconcileError> {
        self.json(self.http.post(self.tasks_url(list_id)).json(task)).await
    }

    async fn update_task(&self, list_id: &str, task_id: &str, task: &GoogleTask) -> Result<GoogleTask, ReconcileError> {
        let url = format!("{}/{}", self.tasks_url(list_id), enc(task_id));
        self.json(self.http.patch(url).json(task)).await
    }

    async fn delete_task(&self, list_id: &str, task_id: &str) -> Result<(), ReconcileError> {
        self.delete(format!("{}/{}", self.tasks_url(list_id), enc(task_id)))
            .await
    }
}
