//! Recurrence settings attached to items and tasks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndType {
    #[default]
    Never,
    Date,
    Count,
}

/// Schedule rule for a repeating item or task.
///
/// Stored as camelCase JSON inside the `recurring_config` column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecurringConfig {
    pub frequency: Option<Frequency>,
    /// Non-positive values are treated as 1.
    pub interval: i64,
    /// "HH:MM". Falls back to the reference time of day when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Weekday ordinals, 0 = Sunday .. 6 = Saturday.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_week_days: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_month_day: Option<u32>,
    pub end_type: EndType,
    /// RFC 3339 timestamp or plain `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_count: Option<u32>,
}

impl RecurringConfig {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency: Some(frequency),
            interval: 1,
            ..Default::default()
        }
    }

    pub fn effective_interval(&self) -> i64 {
        if self.interval < 1 {
            1
        } else {
            self.interval
        }
    }
}
