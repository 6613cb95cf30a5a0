//! RRULE string helpers: normalization, `UNTIL` truncation and occurrence
//! expansion through the `rrule` crate.

use chrono::{DateTime, Duration, NaiveTime, SecondsFormat, TimeZone, Utc};
use rrule::RRuleSet;

use crate::error::SeriesEditError;

const EXPANSION_LIMIT: u16 = 1_000;

/// Strip an optional `RRULE:` prefix and surrounding whitespace.
pub fn normalize(rule: &str) -> &str {
    let rule = rule.trim();
    rule.strip_prefix("RRULE:").unwrap_or(rule)
}

/// Canonical ISO form used as the exception join key.
pub fn occurrence_key(start: DateTime<Utc>) -> String {
    start.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_occurrence(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// End the rule the day before `split`: existing `UNTIL`/`COUNT` parts are
/// replaced by `UNTIL=<day before>T235959Z`.
pub fn truncate_until(rule: &str, split: DateTime<Utc>) -> String {
    let until = Utc.from_utc_datetime(
        &(split.date_naive() - Duration::days(1)).and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default()),
    );

    let mut parts: Vec<String> = normalize(rule)
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter(|p| {
            let key = p.split('=').next().unwrap_or_default().to_ascii_uppercase();
            key != "UNTIL" && key != "COUNT"
        })
        .map(str::to_string)
        .collect();
    parts.push(format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ")));
    parts.join(";")
}

fn rule_set(dtstart: DateTime<Utc>, rule: &str) -> Result<RRuleSet, SeriesEditError> {
    let text = format!(
        "DTSTART:{}\nRRULE:{}",
        dtstart.format("%Y%m%dT%H%M%SZ"),
        normalize(rule)
    );
    text.parse::<RRuleSet>().map_err(|e| SeriesEditError::InvalidRule {
        rule: rule.to_string(),
        message: e.to_string(),
    })
}

/// Occurrence starts of the series in `[from, to]`, inclusive.
pub fn occurrences(
    dtstart: DateTime<Utc>,
    rule: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, SeriesEditError> {
    let set = rule_set(dtstart, rule)?;
    let tz: rrule::Tz = Utc.into();
    let after = (from - Duration::seconds(1)).with_timezone(&tz);
    let before = (to + Duration::seconds(1)).with_timezone(&tz);

    let result = set.after(after).before(before).all(EXPANSION_LIMIT);
    Ok(result.dates.iter().map(|d| d.with_timezone(&Utc)).collect())
}

/// Validate that the rule parses for `dtstart`.
pub fn validate(dtstart: DateTime<Utc>, rule: &str) -> Result<(), SeriesEditError> {
    rule_set(dtstart, rule).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        parse_occurrence(s).unwrap()
    }

    #[test]
    fn normalize_strips_prefix() {
        assert_eq!(normalize(" RRULE:FREQ=DAILY "), "FREQ=DAILY");
        assert_eq!(normalize("FREQ=WEEKLY;BYDAY=MO"), "FREQ=WEEKLY;BYDAY=MO");
    }

    #[test]
    fn truncate_replaces_count_and_until() {
        let split = at("2024-03-10T09:00:00Z");
        assert_eq!(
            truncate_until("RRULE:FREQ=DAILY;COUNT=30;INTERVAL=2", split),
            "FREQ=DAILY;INTERVAL=2;UNTIL=20240309T235959Z"
        );
        assert_eq!(
            truncate_until("FREQ=WEEKLY;UNTIL=20250101T000000Z;BYDAY=MO", split),
            "FREQ=WEEKLY;BYDAY=MO;UNTIL=20240309T235959Z"
        );
    }

    #[test]
    fn occurrences_respect_window() {
        let start = at("2024-01-01T09:00:00Z");
        let dates = occurrences(start, "FREQ=DAILY", at("2024-01-03T00:00:00Z"), at("2024-01-05T23:00:00Z")).unwrap();
        assert_eq!(
            dates,
            vec![at("2024-01-03T09:00:00Z"), at("2024-01-04T09:00:00Z"), at("2024-01-05T09:00:00Z")]
        );
    }

    #[test]
    fn truncated_rule_keeps_earlier_occurrences() {
        let start = at("2024-01-01T09:00:00Z");
        let split = at("2024-01-05T09:00:00Z");
        let rule = truncate_until("FREQ=DAILY", split);
        let dates = occurrences(start, &rule, start, at("2024-02-01T00:00:00Z")).unwrap();
        assert_eq!(dates.len(), 4);
        assert_eq!(dates.last().copied(), Some(at("2024-01-04T09:00:00Z")));
    }

    #[test]
    fn invalid_rule_is_reported() {
        let err = validate(at("2024-01-01T09:00:00Z"), "FREQ=SOMETIMES").unwrap_err();
        assert!(matches!(err, SeriesEditError::InvalidRule { .. }));
    }

    #[test]
    fn occurrence_key_is_millisecond_iso() {
        assert_eq!(occurrence_key(at("2024-01-15T09:00:00+02:00")), "2024-01-15T07:00:00.000Z");
    }
}
