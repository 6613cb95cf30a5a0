//! TOML-based application configuration.
//!
//! Stores:
//! - Dispatcher pacing and retry limits
//! - Remote store endpoint and credentials
//! - Google Calendar / Tasks reconciliation settings
//!
//! Configuration is stored at `~/.config/offsync/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;

/// Pacing and retry limits for the rate-adaptive dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay on a throttling response (> 1).
    #[serde(default = "default_throttle_factor")]
    pub throttle_factor: f64,
    /// Multiplier applied to the delay on success (< 1).
    #[serde(default = "default_relief_factor")]
    pub relief_factor: f64,
    /// Consecutive successes between batch pauses.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_batch_pause_multiplier")]
    pub batch_pause_multiplier: u32,
    /// Requeue limit for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// In-place retry limit for throttled operations.
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

/// Remote store endpoint (PostgREST compatible).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_calendar_api_base")]
    pub api_base: String,
    #[serde(default = "default_tasks_api_base")]
    pub tasks_api_base: String,
    #[serde(default = "default_calendar_id")]
    pub default_calendar_id: String,
    #[serde(default = "default_task_list_id")]
    pub default_task_list_id: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/offsync/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub google: GoogleConfig,
}

fn default_initial_delay_ms() -> u64 {
    100
}
fn default_min_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_throttle_factor() -> f64 {
    2.0
}
fn default_relief_factor() -> f64 {
    0.9
}
fn default_batch_size() -> u32 {
    10
}
fn default_batch_pause_multiplier() -> u32 {
    5
}
fn default_max_retries() -> u32 {
    5
}
fn default_max_rate_limit_retries() -> u32 {
    8
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_calendar_api_base() -> String {
    "https://www.googleapis.com/calendar/v3".into()
}
fn default_tasks_api_base() -> String {
    "https://tasks.googleapis.com/tasks/v1".into()
}
fn default_calendar_id() -> String {
    "primary".into()
}
fn default_task_list_id() -> String {
    "@default".into()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            throttle_factor: default_throttle_factor(),
            relief_factor: default_relief_factor(),
            batch_size: default_batch_size(),
            batch_pause_multiplier: default_batch_pause_multiplier(),
            max_retries: default_max_retries(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl DispatcherConfig {
    /// Exponential backoff for the `retries`-th transient failure.
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 2u64.saturating_pow(retries.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms))
    }

    /// Check floor/ceiling and factor sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay_ms == 0 || self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "dispatcher.min_delay_ms".into(),
                message: "must be positive and not above max_delay_ms".into(),
            });
        }
        if self.throttle_factor <= 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "dispatcher.throttle_factor".into(),
                message: "must be greater than 1".into(),
            });
        }
        if !(self.relief_factor > 0.0 && self.relief_factor < 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "dispatcher.relief_factor".into(),
                message: "must be between 0 and 1 (exclusive)".into(),
            });
        }
        Ok(())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            user_id: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: default_calendar_api_base(),
            tasks_api_base: default_tasks_api_base(),
            default_calendar_id: default_calendar_id(),
            default_task_list_id: default_task_list_id(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::MissingKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let (parents, leaf) = match key.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, key),
        };
        if leaf.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        for part in parents.into_iter().flat_map(|p| p.split('.')) {
            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        let obj = current.as_object_mut().ok_or_else(unknown)?;
        let existing = obj.get(leaf).ok_or_else(unknown)?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
            ),
            serde_json::Value::Number(_) => {
                if let Ok(n) = value.parse::<u64>() {
                    serde_json::Value::Number(n.into())
                } else {
                    value
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(serde_json::Value::Number)
                        .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                }
            }
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
            }
            _ => serde_json::Value::String(value.into()),
        };

        obj.insert(leaf.to_string(), new_value);
        Ok(())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/offsync"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk, writing defaults on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
