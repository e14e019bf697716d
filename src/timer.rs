//! Timer handles: monotonic intervals and calendar periods.

use std::io;

use crate::event::{EventKind, EventRef, Priority, TimerCallback};

/// Identifier of a timer registered with an [`EventLoop`].
///
/// Returned by [`EventLoop::add_timer`] and [`EventLoop::add_period`] and
/// passed back into the timer's callback. The id stays valid until the timer
/// is deleted or expires its repeat count; after that it may be reused for a
/// later timer.
///
/// [`EventLoop`]: crate::EventLoop
/// [`EventLoop::add_timer`]: crate::EventLoop::add_timer
/// [`EventLoop::add_period`]: crate::EventLoop::add_period
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) usize);

/// Calendar schedule of a period timer.
///
/// A period timer fires at the next wall-clock minute matching every
/// non-wildcard field. Negative fields are wildcards.
///
/// ```
/// use evio::PeriodSpec;
///
/// // Every day at 04:30 local time.
/// let nightly = PeriodSpec::new(30, 4, -1, -1, -1).unwrap();
/// # drop(nightly);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PeriodSpec {
    pub(crate) minute: i8,
    pub(crate) hour: i8,
    pub(crate) day: i8,
    pub(crate) week: i8,
    pub(crate) month: i8,
}

impl PeriodSpec {
    /// Build a schedule from calendar fields; negative means wildcard.
    ///
    /// Ranges: `minute ≤ 59`, `hour ≤ 23`, `day ≤ 31`, `week ≤ 6` (0 is
    /// Sunday), `month ≤ 12`. Out-of-range fields are rejected with
    /// [`io::ErrorKind::InvalidInput`].
    pub fn new(minute: i8, hour: i8, day: i8, week: i8, month: i8) -> io::Result<PeriodSpec> {
        if minute > 59 || hour > 23 || day > 31 || week > 6 || month > 12 {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        Ok(PeriodSpec {
            minute,
            hour,
            day,
            week,
            month,
        })
    }
}

/// A timer registered with the loop. Embeds the common event header.
pub(crate) struct TimerEntry {
    pub(crate) kind: EventKind,
    pub(crate) priority: Priority,
    pub(crate) active: bool,
    pub(crate) pending: bool,
    pub(crate) destroy: bool,
    pub(crate) pending_next: Option<EventRef>,
    pub(crate) cb: Option<TimerCallback>,
    /// Remaining firings; [`INFINITE`](crate::INFINITE) means forever.
    pub(crate) repeat: u32,
    /// Wall-anchored monotonic microseconds of the next firing.
    pub(crate) next_fire: u64,
    /// Interval of a [`EventKind::Timeout`] timer, milliseconds.
    pub(crate) interval_ms: u64,
    /// Schedule of a [`EventKind::Period`] timer.
    pub(crate) period: Option<PeriodSpec>,
}

impl TimerEntry {
    pub(crate) fn new_timeout(interval_ms: u64, repeat: u32, cb: TimerCallback) -> TimerEntry {
        TimerEntry {
            kind: EventKind::Timeout,
            priority: Priority::Highest,
            active: false,
            pending: false,
            destroy: false,
            pending_next: None,
            cb: Some(cb),
            repeat,
            next_fire: 0,
            interval_ms,
            period: None,
        }
    }

    pub(crate) fn new_period(spec: PeriodSpec, repeat: u32, cb: TimerCallback) -> TimerEntry {
        TimerEntry {
            kind: EventKind::Period,
            priority: Priority::High,
            active: false,
            pending: false,
            destroy: false,
            pending_next: None,
            cb: Some(cb),
            repeat,
            next_fire: 0,
            interval_ms: 0,
            period: Some(spec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PeriodSpec;
    use std::io;

    #[test]
    fn spec_validation() {
        assert!(PeriodSpec::new(-1, -1, -1, -1, -1).is_ok());
        assert!(PeriodSpec::new(59, 23, 31, 6, 12).is_ok());
        for bad in [
            PeriodSpec::new(60, 0, -1, -1, -1),
            PeriodSpec::new(0, 24, -1, -1, -1),
            PeriodSpec::new(0, 0, 32, -1, -1),
            PeriodSpec::new(0, 0, -1, 7, -1),
            PeriodSpec::new(0, 0, -1, -1, 13),
        ] {
            assert_eq!(bad.unwrap_err().kind(), io::ErrorKind::InvalidInput);
        }
    }
}
