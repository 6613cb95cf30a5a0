//! Next-occurrence calculation for recurring items and tasks.
//!
//! Pure functions only: no clock access except the documented fallback to
//! "now" when the reference time cannot be parsed. All arithmetic happens in
//! the wall-clock time of the reference timestamp's offset.

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc,
};

use crate::model::{EndType, Frequency, RecurringConfig};

/// Compute the occurrence following `reference`.
///
/// `reference` is an ISO timestamp; anything unparsable is replaced by the
/// current time. Returns `None` when there is no config or frequency, when
/// the series has ended, or when the interval overflows the calendar.
pub fn next_occurrence(
    config: Option<&RecurringConfig>,
    reference: &str,
) -> Option<DateTime<FixedOffset>> {
    let config = config?;
    let reference = parse_reference(reference).unwrap_or_else(|| {
        tracing::debug!(reference, "unparsable reference time, using now");
        Utc::now().fixed_offset()
    });
    next_occurrence_from(config, reference)
}

/// Typed variant of [`next_occurrence`].
pub fn next_occurrence_from(
    config: &RecurringConfig,
    reference: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    let frequency = config.frequency?;
    let interval = config.effective_interval();
    let local = reference.naive_local();
    let time = config
        .time
        .as_deref()
        .and_then(parse_hh_mm)
        .unwrap_or_else(|| local.time());

    let date = match frequency {
        Frequency::Daily => add_days(local.date(), interval)?,
        Frequency::Weekly => next_weekly_date(local.date(), interval, config.by_week_days.as_deref())?,
        Frequency::Monthly => {
            let day = config.by_month_day.unwrap_or_else(|| local.day());
            add_months_clamped(local.date(), interval, day)?
        }
        Frequency::Yearly => add_months_clamped(local.date(), interval.checked_mul(12)?, local.day())?,
    };

    let next = reference
        .offset()
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .single()?;

    if config.end_type == EndType::Date {
        if let Some(end) = config.end_date.as_deref().and_then(|e| parse_end_date(e, reference.offset())) {
            if next.date_naive() > end {
                return None;
            }
        }
    }

    Some(next)
}

fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(TimeDelta::try_days(days)?)
}

fn add_weeks(date: NaiveDate, weeks: i64) -> Option<NaiveDate> {
    date.checked_add_signed(TimeDelta::try_weeks(weeks)?)
}

fn next_weekly_date(date: NaiveDate, interval: i64, week_days: Option<&[u8]>) -> Option<NaiveDate> {
    let mut days: Vec<i64> = week_days
        .unwrap_or_default()
        .iter()
        .filter(|d| **d < 7)
        .map(|d| i64::from(*d))
        .collect();
    days.sort_unstable();
    days.dedup();

    let Some(&first) = days.first() else {
        return add_weeks(date, interval);
    };

    let current = i64::from(date.weekday().num_days_from_sunday());
    if let Some(&later) = days.iter().find(|d| **d > current) {
        return add_days(date, later - current);
    }

    let week_start = add_days(date, -current)?;
    add_days(add_weeks(week_start, interval)?, first)
}

/// Move `months` months forward and land on `day`, clamped to the last day
/// of the target month.
fn add_months_clamped(date: NaiveDate, months: i64, day: u32) -> Option<NaiveDate> {
    let total = (i64::from(date.year()) * 12 + i64::from(date.month0())).checked_add(months)?;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;
    let day = day.clamp(1, days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some(first_of_next.pred_opt()?.day())
}

fn parse_hh_mm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Accepts RFC 3339, offset-less `YYYY-MM-DDTHH:MM[:SS]` (read as UTC) and
/// bare dates (midnight UTC).
pub fn parse_reference(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

fn parse_end_date(s: &str, offset: &FixedOffset) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
        return Some(d);
    }
    parse_reference(s).map(|dt| dt.with_timezone(offset).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use chrono::Weekday;

    fn at(s: &str) -> DateTime<FixedOffset> {
        parse_reference(s).unwrap()
    }

    #[test]
    fn daily_advances_one_day_at_configured_time() {
        let mut config = RecurringConfig::new(Frequency::Daily);
        config.time = Some("09:00".into());
        let next = next_occurrence(Some(&config), "2024-01-15T09:00").unwrap();
        assert_eq!(next, at("2024-01-16T09:00:00Z"));
    }

    #[test]
    fn daily_normalizes_to_time_of_day() {
        let mut config = RecurringConfig::new(Frequency::Daily);
        config.interval = 3;
        config.time = Some("18:45".into());
        let next = next_occurrence(Some(&config), "2024-01-15T07:10:00+02:00").unwrap();
        assert_eq!(next, at("2024-01-18T18:45:00+02:00"));
    }

    #[test]
    fn missing_time_keeps_reference_time() {
        let config = RecurringConfig::new(Frequency::Daily);
        let next = next_occurrence(Some(&config), "2024-03-01T13:37:00Z").unwrap();
        assert_eq!(next, at("2024-03-02T13:37:00Z"));
    }

    #[test]
    fn weekly_without_days_adds_weeks() {
        let mut config = RecurringConfig::new(Frequency::Weekly);
        config.interval = 2;
        let next = next_occurrence(Some(&config), "2024-01-03T10:00:00Z").unwrap();
        assert_eq!(next, at("2024-01-17T10:00:00Z"));
    }

    #[test]
    fn weekly_days_pick_later_day_in_same_week() {
        let mut config = RecurringConfig::new(Frequency::Weekly);
        config.by_week_days = Some(vec![1, 3, 5]);
        // Monday 2024-01-15 -> Wednesday 2024-01-17
        let next = next_occurrence(Some(&config), "2024-01-15T08:00:00Z").unwrap();
        assert_eq!(next.weekday(), Weekday::Wed);
        assert_eq!(next, at("2024-01-17T08:00:00Z"));
    }

    #[test]
    fn weekly_days_wrap_to_following_week() {
        let mut config = RecurringConfig::new(Frequency::Weekly);
        config.by_week_days = Some(vec![1, 3]);
        // Wednesday 2024-01-17 -> Monday 2024-01-22
        let next = next_occurrence(Some(&config), "2024-01-17T08:00:00Z").unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next, at("2024-01-22T08:00:00Z"));
    }

    #[test]
    fn weekly_days_wrap_honors_interval() {
        let mut config = RecurringConfig::new(Frequency::Weekly);
        config.interval = 2;
        config.by_week_days = Some(vec![3, 1]);
        let next = next_occurrence(Some(&config), "2024-01-17T08:00:00Z").unwrap();
        assert_eq!(next, at("2024-01-29T08:00:00Z"));
    }

    #[test]
    fn monthly_clamps_to_end_of_february() {
        let mut config = RecurringConfig::new(Frequency::Monthly);
        config.by_month_day = Some(31);
        let next = next_occurrence(Some(&config), "2024-01-31T12:00:00Z").unwrap();
        assert_eq!(next, at("2024-02-29T12:00:00Z"));

        let next = next_occurrence(Some(&config), "2023-01-31T12:00:00Z").unwrap();
        assert_eq!(next, at("2023-02-28T12:00:00Z"));
    }

    #[test]
    fn monthly_returns_to_target_day_after_short_month() {
        let mut config = RecurringConfig::new(Frequency::Monthly);
        config.by_month_day = Some(31);
        let next = next_occurrence(Some(&config), "2024-02-29T12:00:00Z").unwrap();
        assert_eq!(next, at("2024-03-31T12:00:00Z"));
    }

    #[test]
    fn monthly_crosses_year_boundary() {
        let mut config = RecurringConfig::new(Frequency::Monthly);
        config.interval = 2;
        let next = next_occurrence(Some(&config), "2024-11-30T08:00:00Z").unwrap();
        assert_eq!(next, at("2025-01-30T08:00:00Z"));
    }

    #[test]
    fn yearly_keeps_month_and_day() {
        let config = RecurringConfig::new(Frequency::Yearly);
        let next = next_occurrence(Some(&config), "2024-07-04T09:00:00Z").unwrap();
        assert_eq!(next, at("2025-07-04T09:00:00Z"));

        let leap = next_occurrence(Some(&config), "2024-02-29T09:00:00Z").unwrap();
        assert_eq!(leap, at("2025-02-28T09:00:00Z"));
    }

    #[test]
    fn end_date_is_inclusive_of_whole_day() {
        let mut config = RecurringConfig::new(Frequency::Daily);
        config.time = Some("23:00".into());
        config.end_type = EndType::Date;
        config.end_date = Some("2024-01-16".into());

        assert!(next_occurrence(Some(&config), "2024-01-15T23:00:00Z").is_some());
        assert!(next_occurrence(Some(&config), "2024-01-16T23:00:00Z").is_none());
    }

    #[test]
    fn missing_config_or_frequency_yields_none() {
        assert!(next_occurrence(None, "2024-01-15T09:00:00Z").is_none());
        assert!(next_occurrence(Some(&RecurringConfig::default()), "2024-01-15T09:00:00Z").is_none());
    }

    #[test]
    fn unparsable_reference_falls_back_to_now() {
        let config = RecurringConfig::new(Frequency::Daily);
        let before = Utc::now();
        let next = next_occurrence(Some(&config), "not a date").unwrap();
        assert!(next.with_timezone(&Utc) > before + Duration::hours(23));
    }

    #[test]
    fn non_positive_interval_behaves_like_one() {
        let mut config = RecurringConfig::new(Frequency::Weekly);
        config.interval = 0;
        let next = next_occurrence(Some(&config), "2024-01-03T10:00:00Z").unwrap();
        assert_eq!(next, at("2024-01-10T10:00:00Z"));
    }

    #[test]
    fn huge_interval_yields_none_instead_of_overflowing() {
        for frequency in [Frequency::Daily, Frequency::Weekly, Frequency::Monthly, Frequency::Yearly] {
            let mut config = RecurringConfig::new(frequency);
            config.interval = 1_000_000_000;
            assert_eq!(next_occurrence(Some(&config), "2024-01-03T10:00:00Z"), None, "{frequency:?}");
        }

        let mut config = RecurringConfig::new(Frequency::Weekly);
        config.interval = i64::MAX;
        config.by_week_days = Some(vec![1]);
        assert_eq!(next_occurrence(Some(&config), "2024-01-03T10:00:00Z"), None);
    }
}
