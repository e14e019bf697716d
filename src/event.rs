//! Common vocabulary shared by every loop-managed handle.
//!
//! Every handle (IO, timer, idle) carries the same small header: its kind,
//! its priority lane, the `active`/`pending`/`destroy` lifecycle flags and a
//! link into the per-priority pending chain. The concrete handle types embed
//! these fields directly; this module only defines the shared pieces.

use std::os::unix::io::RawFd;

use crate::event_loop::EventLoop;
use crate::idle::IdleId;
use crate::timer::TimerId;

/// Repeat count sentinel: the handle re-fires until it is deleted.
pub const INFINITE: u32 = u32::MAX;

/// The class of a loop-managed handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// File descriptor readiness.
    Io,
    /// Monotonic interval timer.
    Timeout,
    /// Calendar-periodic timer.
    Period,
    /// Idle handler, invoked on otherwise-quiet ticks.
    Idle,
}

/// Dispatch priority lane of a handle.
///
/// Within a tick, pending callbacks in a higher lane run strictly before
/// those in a lower lane; the numerically highest lane index is the highest
/// priority. Interval timers dispatch at `Highest`, period timers at `High`,
/// IO at `Normal` and idle handlers at `Lowest`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum Priority {
    /// Last lane to dispatch.
    Lowest = 0,
    /// Below normal.
    Low = 1,
    /// Default lane.
    Normal = 2,
    /// Above normal.
    High = 3,
    /// First lane to dispatch.
    Highest = 4,
}

impl Priority {
    /// Number of priority lanes.
    pub const COUNT: usize = 5;

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Reference to a handle on a pending chain.
///
/// Pending lanes are singly linked lists threaded through the handles
/// themselves; this is the link payload. A handle is on at most one chain at
/// a time (guarded by its `pending` flag).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum EventRef {
    Timer(usize),
    Idle(usize),
    Io(RawFd),
}

/// Callback invoked when a timer fires.
pub type TimerCallback = Box<dyn FnMut(&mut EventLoop, TimerId)>;

/// Callback invoked when an idle handler runs.
pub type IdleCallback = Box<dyn FnMut(&mut EventLoop, IdleId)>;

/// Callback invoked with the bytes read from a descriptor.
pub type ReadCallback = Box<dyn FnMut(&mut EventLoop, RawFd, &[u8])>;

/// Callback invoked after a write chunk has been fully flushed.
pub type WriteCallback = Box<dyn FnMut(&mut EventLoop, RawFd, usize)>;

/// Callback invoked with the fd of a newly accepted connection.
pub type AcceptCallback = Box<dyn FnMut(&mut EventLoop, RawFd)>;

/// Callback invoked once a nonblocking connect completes.
pub type ConnectCallback = Box<dyn FnMut(&mut EventLoop, RawFd)>;

/// Callback invoked exactly once when a descriptor is closed.
pub type CloseCallback = Box<dyn FnMut(&mut EventLoop, RawFd)>;
