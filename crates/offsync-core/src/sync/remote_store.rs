//! Remote store capability and its PostgREST-compatible HTTP implementation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use crate::model::{EntityClass, EntityPayload};
use crate::storage::RemoteConfig;

use super::dispatcher::lock;
use super::types::{OpKind, RemoteError, SyncError};

/// Upsert/delete by id per entity table.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert(&self, payload: &EntityPayload) -> Result<(), RemoteError>;

    async fn delete(&self, class: EntityClass, id: &str) -> Result<(), RemoteError>;

    /// Every row of `class` visible to the current user.
    async fn fetch_all(&self, class: EntityClass) -> Result<Vec<EntityPayload>, RemoteError>;
}

/// PostgREST error codes treated as schema mismatches.
const SCHEMA_CODES: &[&str] = &["42703", "PGRST204", "22P02"];
const UNIQUE_VIOLATION: &str = "23505";

pub struct RestRemoteStore {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: String,
    user_id: Option<String>,
}

impl RestRemoteStore {
    /// # Errors
    /// Returns [`SyncError::NotConfigured`] when the endpoint or key is empty.
    pub fn new(config: &RemoteConfig, access_token: Option<String>) -> Result<Self, SyncError> {
        if !config.is_configured() {
            return Err(SyncError::NotConfigured(
                "set remote.base_url and remote.api_key".into(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: access_token.unwrap_or_else(|| config.api_key.clone()),
            user_id: Some(config.user_id.clone()).filter(|u| !u.is_empty()),
        })
    }

    fn table_url(&self, class: EntityClass) -> String {
        format!("{}/rest/v1/{}", self.base_url, class.table())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
    }

    fn body(&self, payload: &EntityPayload) -> Result<Value, RemoteError> {
        let mut body = payload.to_value().map_err(|e| RemoteError::Schema(e.to_string()))?;
        if let (Some(user_id), Some(obj)) = (&self.user_id, body.as_object_mut()) {
            obj.entry("user_id")
                .or_insert_with(|| Value::String(user_id.clone()));
        }
        Ok(body)
    }
}

/// Map a non-success response onto the remote error taxonomy.
pub(crate) async fn classify_response(resp: Response) -> RemoteError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    classify(status, &text)
}

pub(crate) fn classify(status: StatusCode, body: &str) -> RemoteError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        RemoteError::RateLimited
    } else if code == UNIQUE_VIOLATION || status == StatusCode::CONFLICT {
        RemoteError::UniqueViolation(message)
    } else if SCHEMA_CODES.contains(&code)
        || status == StatusCode::BAD_REQUEST
        || status == StatusCode::UNPROCESSABLE_ENTITY
    {
        RemoteError::Schema(message)
    } else {
        RemoteError::Other {
            status: Some(status.as_u16()),
            message,
        }
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn upsert(&self, payload: &EntityPayload) -> Result<(), RemoteError> {
        let url = self.table_url(payload.class());
        let body = self.body(payload)?;
        let resp = self
            .request(reqwest::Method::POST, &url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(classify_response(resp).await)
        }
    }

    async fn delete(&self, class: EntityClass, id: &str) -> Result<(), RemoteError> {
        let url = format!("{}?id=eq.{}", self.table_url(class), urlencoding::encode(id));
        let resp = self.request(reqwest::Method::DELETE, &url).send().await?;

        // Deleting a row that is already gone is fine.
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(classify_response(resp).await)
        }
    }

    async fn fetch_all(&self, class: EntityClass) -> Result<Vec<EntityPayload>, RemoteError> {
        let mut url = format!("{}?select=*", self.table_url(class));
        if let Some(user_id) = &self.user_id {
            url.push_str(&format!("&user_id=eq.{}", urlencoding::encode(user_id)));
        }
        let resp = self.request(reqwest::Method::GET, &url).send().await?;
        if !resp.status().is_success() {
            return Err(classify_response(resp).await);
        }

        let rows: Vec<Value> = resp.json().await?;
        let mut payloads = Vec::with_capacity(rows.len());
        for row in rows {
            match EntityPayload::from_value(class, row) {
                Ok(p) => payloads.push(p),
                Err(e) => tracing::warn!(entity = %class, error = %e, "skipping undecodable remote row"),
            }
        }
        Ok(payloads)
    }
}

/// In-process remote store for tests and dry runs.
///
/// Failures can be scripted: each queued error is returned by the next write
/// instead of applying it. Deletes can be made to "not land" to simulate a
/// lagging remote.
#[derive(Default)]
pub struct MemoryRemote {
    rows: Mutex<BTreeMap<(EntityClass, String), EntityPayload>>,
    failures: Mutex<VecDeque<RemoteError>>,
    writes: Mutex<Vec<(OpKind, EntityClass, String)>>,
    ignore_deletes: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next writes with these errors, in order.
    pub fn fail_next<I: IntoIterator<Item = RemoteError>>(&self, errors: I) {
        lock(&self.failures).extend(errors);
    }

    pub fn set_ignore_deletes(&self, ignore: bool) {
        self.ignore_deletes.store(ignore, Ordering::SeqCst);
    }

    /// Insert a row directly, as if another client wrote it.
    pub fn seed(&self, payload: EntityPayload) {
        lock(&self.rows).insert((payload.class(), payload.id().to_string()), payload);
    }

    pub fn get(&self, class: EntityClass, id: &str) -> Option<EntityPayload> {
        lock(&self.rows).get(&(class, id.to_string())).cloned()
    }

    /// Every attempted write, including failed ones.
    pub fn writes(&self) -> Vec<(OpKind, EntityClass, String)> {
        lock(&self.writes).clone()
    }

    fn attempt(&self, kind: OpKind, class: EntityClass, id: &str) -> Result<(), RemoteError> {
        lock(&self.writes).push((kind, class, id.to_string()));
        match lock(&self.failures).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert(&self, payload: &EntityPayload) -> Result<(), RemoteError> {
        self.attempt(OpKind::Upsert, payload.class(), payload.id())?;
        self.seed(payload.clone());
        Ok(())
    }

    async fn delete(&self, class: EntityClass, id: &str) -> Result<(), RemoteError> {
        self.attempt(OpKind::Delete, class, id)?;
        if !self.ignore_deletes.load(Ordering::SeqCst) {
            lock(&self.rows).remove(&(class, id.to_string()));
        }
        Ok(())
    }

    async fn fetch_all(&self, class: EntityClass) -> Result<Vec<EntityPayload>, RemoteError> {
        Ok(lock(&self.rows)
            .iter()
            .filter(|((c, _), _)| *c == class)
            .map(|(_, p)| p.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;
    use crate::sync::types::ErrorClass;

    fn store_for(server: &mockito::ServerGuard) -> RestRemoteStore {
        let config = RemoteConfig {
            base_url: server.url(),
            api_key: "anon-key".into(),
            user_id: "user-1".into(),
            timeout_secs: 5,
        };
        RestRemoteStore::new(&config, Some("session-token".into())).unwrap()
    }

    fn task() -> EntityPayload {
        EntityPayload::Task(Task {
            id: "t-1".into(),
            title: "Plan week".into(),
            ..Default::default()
        })
    }

    #[test]
    fn classify_maps_status_and_codes() {
        assert_eq!(classify(StatusCode::TOO_MANY_REQUESTS, ""), RemoteError::RateLimited);
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, r#"{"code":"23505","message":"dup"}"#),
            RemoteError::UniqueViolation(_)
        ));
        assert!(matches!(classify(StatusCode::CONFLICT, ""), RemoteError::UniqueViolation(_)));
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, r#"{"code":"PGRST204","message":"no column"}"#),
            RemoteError::Schema("no column".into())
        );
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, r#"{"code":"42703","message":"x"}"#).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify(StatusCode::BAD_GATEWAY, "upstream").class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn unconfigured_store_is_rejected() {
        let err = RestRemoteStore::new(&RemoteConfig::default(), None).err().unwrap();
        assert!(matches!(err, SyncError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn upsert_posts_merge_duplicates_with_user_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/tasks")
            .match_header("apikey", "anon-key")
            .match_header("authorization", "Bearer session-token")
            .match_header("prefer", mockito::Matcher::Regex("resolution=merge-duplicates".into()))
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "id": "t-1",
                "user_id": "user-1",
                "title": "Plan week"
            })))
            .with_status(201)
            .create_async()
            .await;

        store_for(&server).upsert(&task()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_response_is_classified() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rest/v1/tasks")
            .with_status(429)
            .create_async()
            .await;

        let err = store_for(&server).upsert(&task()).await.unwrap_err();
        assert_eq!(err, RemoteError::RateLimited);
    }

    #[tokio::test]
    async fn delete_targets_id_filter() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/rest/v1/events")
            .match_query(mockito::Matcher::UrlEncoded("id".into(), "eq.ev-1".into()))
            .with_status(204)
            .create_async()
            .await;

        store_for(&server).delete(EntityClass::Event, "ev-1").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_all_skips_bad_rows() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/lists")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"id":"l-1","title":"Inbox","extra":"dropped"},{"id":42}]"#)
            .create_async()
            .await;

        let rows = store_for(&server).fetch_all(EntityClass::List).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), "l-1");
    }

    #[tokio::test]
    async fn unreachable_server_is_network_class() {
        let config = RemoteConfig {
            base_url: "http://127.0.0.1:1".into(),
            api_key: "k".into(),
            ..Default::default()
        };
        let store = RestRemoteStore::new(&config, None).unwrap();
        let err = store.upsert(&task()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Network);
    }
}
