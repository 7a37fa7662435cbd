use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};

pub const DEFAULT_DEADLINE_BUFFER_DAYS: i64 = 2;

const CRITICAL_HOURS: f64 = 12.0;
const SAME_DAY_HOURS: f64 = 24.0;
const TWO_DAY_HOURS: f64 = 48.0;
const THREE_DAY_HOURS: f64 = 72.0;

/// Latest acceptable delivery time: start of day `harvest + freshness - buffer` (UTC).
/// `None` when the date falls outside the representable calendar.
pub fn delivery_deadline(
    harvest_date: NaiveDate,
    freshness_duration_days: u32,
    buffer_days: i64,
) -> Option<DateTime<Utc>> {
    let shelf_days = i64::from(freshness_duration_days) - buffer_days;
    let deadline_date = if shelf_days >= 0 {
        harvest_date.checked_add_days(Days::new(shelf_days as u64))
    } else {
        harvest_date.checked_sub_days(Days::new(shelf_days.unsigned_abs()))
    }?;

    Some(deadline_date.and_time(NaiveTime::MIN).and_utc())
}

/// Step function over hours left; boundaries fall into the more urgent tier.
pub fn urgency_score(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u8 {
    let hours_left = (deadline - now).num_seconds() as f64 / 3_600.0;

    if hours_left < CRITICAL_HOURS {
        10
    } else if hours_left < SAME_DAY_HOURS {
        9
    } else if hours_left < TWO_DAY_HOURS {
        7
    } else if hours_left < THREE_DAY_HOURS {
        5
    } else {
        3
    }
}
