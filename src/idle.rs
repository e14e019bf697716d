//! Idle handles: callbacks for ticks with no other pressing work.

use crate::event::{EventRef, IdleCallback, Priority};

/// Identifier of an idle handler registered with an [`EventLoop`].
///
/// Returned by [`EventLoop::add_idle`] and passed back into the idle's
/// callback. Valid until the idle is deleted or exhausts its repeat count.
///
/// [`EventLoop`]: crate::EventLoop
/// [`EventLoop::add_idle`]: crate::EventLoop::add_idle
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdleId(pub(crate) usize);

/// An idle handler. Embeds the common event header plus the links of the
/// loop's idle list (index-linked rather than pointer-intrusive).
pub(crate) struct IdleEntry {
    pub(crate) priority: Priority,
    pub(crate) active: bool,
    pub(crate) pending: bool,
    pub(crate) destroy: bool,
    pub(crate) pending_next: Option<EventRef>,
    pub(crate) cb: Option<IdleCallback>,
    pub(crate) repeat: u32,
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
}

impl IdleEntry {
    pub(crate) fn new(repeat: u32, cb: IdleCallback) -> IdleEntry {
        IdleEntry {
            priority: Priority::Lowest,
            active: false,
            pending: false,
            destroy: false,
            pending_next: None,
            cb: Some(cb),
            repeat,
            prev: None,
            next: None,
        }
    }
}
