use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Calendar day (UTC) an instant falls on.
pub(crate) fn day_of(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// Every date in `start..=end`; empty when `end < start`.
pub(crate) fn dates_inclusive(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if end < start {
        return vec![];
    }
    start.iter_days().take_while(|date| *date <= end).collect()
}

pub(crate) fn day_offset(origin: NaiveDate, date: NaiveDate) -> i64 {
    (date - origin).num_days()
}

pub(crate) fn shift_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days))
        .unwrap_or(if days < 0 { NaiveDate::MIN } else { NaiveDate::MAX })
}

pub(crate) fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / 3600.0
}
