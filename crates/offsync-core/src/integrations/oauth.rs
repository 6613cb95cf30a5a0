//! OAuth2 token storage and refresh.
//!
//! Tokens are acquired elsewhere and stored in the OS keyring as JSON under the
//! service name. This module only loads them, refreshes expired access tokens
//! and hands a bearer token to API clients through [`TokenSource`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::keyring_store;
use crate::error::ReconcileError;

pub const GOOGLE_SERVICE: &str = "google";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>, // Unix timestamp
    pub token_type: String,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub service_name: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

impl OAuthConfig {
    /// Google client credentials from the keyring, if both are stored.
    pub fn google_from_keyring() -> Option<Self> {
        let client_id = keyring_store::get("google_client_id").ok().flatten()?;
        let client_secret = keyring_store::get("google_client_secret").ok().flatten()?;
        Some(Self {
            service_name: GOOGLE_SERVICE.to_string(),
            client_id,
            client_secret,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        })
    }
}

/// Refresh an access token using a refresh token and store the result.
pub async fn refresh_token(config: &OAuthConfig, refresh: &str) -> Result<OAuthTokens, ReconcileError> {
    let client = Client::new();
    let params = [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("refresh_token", refresh),
        ("grant_type", "refresh_token"),
    ];

    let resp = client.post(&config.token_url).form(&params).send().await?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await?;

    if let Some(error) = body.get("error") {
        // invalid_grant means the user revoked access.
        if error.as_str() == Some("invalid_grant") {
            return Err(ReconcileError::CredentialMissing);
        }
        return Err(ReconcileError::Api {
            status: Some(status.as_u16()),
            message: format!("OAuth refresh error: {error}"),
        });
    }

    let expires_in = body.get("expires_in").and_then(|v| v.as_i64());
    let expires_at = expires_in.map(|ei| chrono::Utc::now().timestamp() + ei);

    let tokens = OAuthTokens {
        access_token: body["access_token"].as_str().unwrap_or_default().to_string(),
        refresh_token: body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| Some(refresh.to_string())),
        expires_at,
        token_type: body["token_type"].as_str().unwrap_or("Bearer").to_string(),
        scope: body.get("scope").and_then(|v| v.as_str()).map(String::from),
    };

    if let Err(e) = store_tokens(&config.service_name, &tokens) {
        tracing::warn!(service = %config.service_name, error = %e, "could not store refreshed tokens");
    }
    Ok(tokens)
}

/// Load stored tokens from keyring.
pub fn load_tokens(service_name: &str) -> Option<OAuthTokens> {
    keyring_store::get(service_name)
        .ok()
        .flatten()
        .and_then(|json| serde_json::from_str(&json).ok())
}

pub fn store_tokens(service_name: &str, tokens: &OAuthTokens) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string(tokens)?;
    keyring_store::set(service_name, &json)
}

/// Store Google client credentials and a refresh token obtained out of band.
/// The access token starts out expired so the first request refreshes it.
pub fn connect_google(client_id: &str, client_secret: &str, refresh: &str) -> Result<(), Box<dyn std::error::Error>> {
    keyring_store::set("google_client_id", client_id)?;
    keyring_store::set("google_client_secret", client_secret)?;
    let tokens = OAuthTokens {
        access_token: String::new(),
        refresh_token: Some(refresh.to_string()),
        expires_at: Some(0),
        token_type: "Bearer".to_string(),
        scope: None,
    };
    store_tokens(GOOGLE_SERVICE, &tokens)
}

pub fn disconnect_google() -> Result<(), Box<dyn std::error::Error>> {
    for key in [GOOGLE_SERVICE, "google_client_id", "google_client_secret"] {
        keyring_store::delete(key)?;
    }
    Ok(())
}

/// Check if stored tokens are expired (with 60s buffer).
pub fn is_expired(tokens: &OAuthTokens) -> bool {
    match tokens.expires_at {
        Some(exp) => chrono::Utc::now().timestamp() > exp - 60,
        None => false,
    }
}

/// Bearer token capability for API clients.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A currently valid access token, or [`ReconcileError::CredentialMissing`].
    async fn access_token(&self) -> Result<String, ReconcileError>;
}

/// Reads Google tokens from the OS keyring, refreshing when expired.
#[derive(Debug, Clone, Default)]
pub struct KeyringTokenSource {
    service_name: String,
}

impl KeyringTokenSource {
    pub fn google() -> Self {
        Self {
            service_name: GOOGLE_SERVICE.to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for KeyringTokenSource {
    async fn access_token(&self) -> Result<String, ReconcileError> {
        let tokens = load_tokens(&self.service_name).ok_or(ReconcileError::CredentialMissing)?;
        if !is_expired(&tokens) {
            return Ok(tokens.access_token);
        }

        let refresh = tokens
            .refresh_token
            .as_deref()
            .ok_or(ReconcileError::CredentialMissing)?;
        let config = OAuthConfig::google_from_keyring().ok_or(ReconcileError::CredentialMissing)?;
        tracing::debug!(service = %self.service_name, "refreshing expired access token");
        Ok(refresh_token(&config, refresh).await?.access_token)
    }
}

/// Fixed token, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenSource(pub Option<String>);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, ReconcileError> {
        self.0.clone().ok_or(ReconcileError::CredentialMissing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(expires_at: Option<i64>) -> OAuthTokens {
        OAuthTokens {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at,
            token_type: "Bearer".into(),
            scope: None,
        }
    }

    #[test]
    fn expiry_uses_buffer() {
        let now = chrono::Utc::now().timestamp();
        assert!(!is_expired(&tokens(None)));
        assert!(!is_expired(&tokens(Some(now + 3600))));
        assert!(is_expired(&tokens(Some(now + 30))));
    }

    #[tokio::test]
    async fn static_source_without_token_reports_missing_credential() {
        let err = StaticTokenSource(None).access_token().await.unwrap_err();
        assert!(err.is_credential_missing());
        assert_eq!(StaticTokenSource(Some("t".into())).access_token().await.unwrap(), "t");
    }

    #[tokio::test]
    async fn refresh_parses_token_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let config = OAuthConfig {
            service_name: "offsync-test-refresh".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_url: format!("{}/token", server.url()),
        };
        let refreshed = refresh_token(&config, "rt").await.unwrap();
        assert_eq!(refreshed.access_token, "fresh");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_missing_credential() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let config = OAuthConfig {
            service_name: "offsync-test-revoked".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_url: format!("{}/token", server.url()),
        };
        let err = refresh_token(&config, "rt").await.unwrap_err();
        assert!(err.is_credential_missing());
    }
}
