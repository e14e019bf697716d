//! Clock plumbing for the loop.
//!
//! Two timescales are in play. Interval timers run on a monotonic
//! microsecond clock ([`gethrtime`]); calendar-period timers are scheduled
//! on wall-clock epoch microseconds. The loop bridges them by anchoring its
//! start wall time to its start hrtime, so every deadline lives on one
//! wall-anchored, monotonically advancing microsecond scale.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, Duration, Local, Timelike};

use crate::timer::PeriodSpec;

/// Monotonic microseconds since an arbitrary process-wide anchor.
pub(crate) fn gethrtime() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_micros() as u64
}

/// Wall-clock seconds since the Unix epoch.
pub(crate) fn wall_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn matches_spec(t: &DateTime<Local>, spec: &PeriodSpec) -> bool {
    (spec.minute < 0 || t.minute() == spec.minute as u32)
        && (spec.hour < 0 || t.hour() == spec.hour as u32)
        && (spec.day < 0 || t.day() == spec.day as u32)
        && (spec.week < 0 || t.weekday().num_days_from_sunday() == spec.week as u32)
        && (spec.month < 0 || t.month() == spec.month as u32)
}

/// Next wall-clock instant strictly in the future matching `spec`, as epoch
/// microseconds. Walks whole minutes forward; negative fields are wildcards.
///
/// Returns `None` when no instant within the next 366 days matches, e.g. a
/// day-of-month/month combination that never occurs.
pub(crate) fn next_period_usec(spec: &PeriodSpec) -> Option<u64> {
    const MAX_STEPS: u32 = 366 * 24 * 60;

    let now = Local::now();
    let mut t = (now + Duration::minutes(1)).with_second(0)?.with_nanosecond(0)?;
    for _ in 0..MAX_STEPS {
        if matches_spec(&t, spec) {
            return Some(t.timestamp() as u64 * 1_000_000);
        }
        t = t + Duration::minutes(1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hrtime_is_monotonic() {
        let a = gethrtime();
        let b = gethrtime();
        assert!(b >= a);
    }

    #[test]
    fn wildcard_period_is_next_minute() {
        let spec = PeriodSpec::new(-1, -1, -1, -1, -1).unwrap();
        let next = next_period_usec(&spec).unwrap();
        let now_us = wall_time() * 1_000_000;
        assert!(next > now_us);
        // At most 60s + the current partial minute away.
        assert!(next <= now_us + 121 * 1_000_000);
        // Lands on a whole minute.
        assert_eq!(next % 60_000_000, 0);
    }

    #[test]
    fn fixed_fields_are_honored() {
        let spec = PeriodSpec::new(30, 4, -1, -1, -1).unwrap();
        let next = next_period_usec(&spec).unwrap();
        let t = DateTime::from_timestamp((next / 1_000_000) as i64, 0)
            .unwrap()
            .with_timezone(&Local);
        assert_eq!(t.minute(), 30);
        assert_eq!(t.hour(), 4);
    }

    #[test]
    fn impossible_combination_is_rejected() {
        // April has no 31st.
        let spec = PeriodSpec::new(0, 0, 31, -1, 4).unwrap();
        assert_eq!(next_period_usec(&spec), None);
    }
}
