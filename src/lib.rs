//! Evio is a lightweight, callback-driven event loop.
//!
//! A single [`EventLoop`] multiplexes three kinds of work onto one
//! cooperative, single-threaded scheduler:
//!
//! * **IO readiness** on file descriptors, surfaced by the OS selector
//!   (epoll on Linux, kqueue on the BSDs and macOS);
//! * **timers** — one-shot, interval and calendar-periodic;
//! * **idle handlers**, invoked on ticks with no other pressing work.
//!
//! Around the core the [`net`] module offers small TCP/UDP server and
//! client constructors that pair a boundary syscall with an IO-handle
//! registration.
//!
//! Callbacks are plain `FnMut` closures receiving `&mut EventLoop`, so a
//! callback may freely add or delete handles, including its own. Within a
//! tick, dispatch runs priority lanes from highest to lowest: interval
//! timers first, then period timers, then IO, then idles.
//!
//! # Examples
//!
//! An interval timer that cancels itself after three firings:
//!
//! ```
//! # fn main() -> std::io::Result<()> {
//! use evio::{EventLoop, INFINITE};
//!
//! let mut el = EventLoop::new()?;
//! let mut fired = 0;
//! el.add_timer(5, INFINITE, move |el, id| {
//!     fired += 1;
//!     if fired == 3 {
//!         el.del_timer(id);
//!     }
//! })?;
//! // Exits once no active handles remain.
//! el.run()?;
//! # Ok(())
//! # }
//! ```
//!
//! Evio targets Unix platforms only; the loop owns its descriptors, timers
//! and idles and none of its APIs may be called from another thread.

#![cfg(unix)]
#![warn(missing_docs, missing_debug_implementations)]

#[macro_use]
mod macros;

mod event;
mod event_loop;
mod idle;
mod interest;
mod io;
pub mod net;
mod sys;
mod time;
mod timer;
mod util;

pub use event::{
    AcceptCallback, CloseCallback, ConnectCallback, EventKind, IdleCallback, Priority,
    ReadCallback, TimerCallback, WriteCallback, INFINITE,
};
pub use event_loop::{EventLoop, LoopStatus};
pub use idle::IdleId;
pub use interest::Interest;
pub use io::IoKind;
pub use timer::{PeriodSpec, TimerId};
