use chrono::{DateTime, NaiveDate, Utc};

const LEAP_SECONDS: [(i32, u32); 18] = [
    (1981, 7),
    (1982, 7),
    (1983, 7),
    (1985, 7),
    (1988, 1),
    (1990, 1),
    (1991, 1),
    (1992, 7),
    (1993, 7),
    (1994, 7),
    (1996, 1),
    (1997, 7),
    (1999, 1),
    (2006, 1),
    (2009, 1),
    (2012, 7),
    (2015, 7),
    (2017, 1),
];

fn gps_epoch() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1980, 1, 6)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

fn leap_seconds_at(t: DateTime<Utc>) -> i64 {
    LEAP_SECONDS
        .iter()
        .filter_map(|(y, m)| NaiveDate::from_ymd_opt(*y, *m, 1))
        .filter_map(|d| d.and_hms_opt(0, 0, 0))
        .filter(|d| d.and_utc() <= t)
        .count() as i64
}

/// Seconds elapsed since the GPS epoch, leap seconds included.
pub fn seconds_since_gps_epoch(t: DateTime<Utc>) -> i64 {
    (t - gps_epoch()).num_seconds() + leap_seconds_at(t)
}

/// GPS time truncated to the 32-bit field used by session-time parameters.
pub fn gps_time_u32(t: DateTime<Utc>) -> u32 {
    seconds_since_gps_epoch(t).rem_euclid(1 << 32) as u32
}
