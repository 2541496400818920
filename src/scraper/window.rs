use chrono::{DateTime, Duration, Utc};

/// Compute the `(start, end)` query window for a metric. With a positive
/// period the end is aligned to the period boundary at or before `now`,
/// so consecutive scrapes ask for the same window instead of a moving
/// target.
pub fn calculate(
    period: i64,
    length: i64,
    delay: i64,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let mut now = now;
    if period > 0 {
        let aligned = now.timestamp() - now.timestamp().rem_euclid(period);
        now = DateTime::<Utc>::from_timestamp(aligned, 0).unwrap_or(now);
    }
    let end = now - Duration::seconds(delay);
    (end - Duration::seconds(length), end)
}
