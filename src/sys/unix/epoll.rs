use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP};

use crate::interest::Interest;

#[derive(Debug)]
pub(crate) struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        // SAFETY: `epoll_create1(2)` ensures the fd is valid.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Selector { ep })
    }

    /// Wait for events for at most `timeout`; `None` blocks indefinitely.
    ///
    /// A signal interrupting the wait is not an error: the call returns with
    /// an empty event set and the caller's tick proceeds as a timeout.
    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout
            .map(|to| {
                // `Duration::as_millis` truncates, so round up. This avoids
                // turning sub-millisecond timeouts into a zero timeout.
                to.checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(to)
                    .as_millis()
                    .min(libc::c_int::MAX as u128) as libc::c_int
            })
            .unwrap_or(-1);

        events.clear();
        match syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            events.as_mut_ptr(),
            events.capacity() as i32,
            timeout,
        )) {
            Ok(n_events) => {
                // SAFETY: `epoll_wait` ensures that `n_events` are assigned.
                unsafe { events.set_len(n_events as usize) };
                Ok(())
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn register(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: fd as u64,
        };

        let ep = self.ep.as_raw_fd();
        syscall!(epoll_ctl(ep, libc::EPOLL_CTL_ADD, fd, &mut event)).map(|_| ())
    }

    pub fn reregister(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: fd as u64,
        };

        let ep = self.ep.as_raw_fd();
        syscall!(epoll_ctl(ep, libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let ep = self.ep.as_raw_fd();
        syscall!(epoll_ctl(ep, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())).map(|_| ())
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.ep.as_raw_fd()
    }
}

// Level-triggered on purpose: the loop re-polls every tick and the write
// queue drain relies on WRITABLE staying signalled until it empties.
fn interest_to_epoll(interest: Interest) -> u32 {
    let mut kind = 0;

    if interest.is_readable() {
        kind = kind | EPOLLIN | EPOLLRDHUP;
    }

    if interest.is_writable() {
        kind |= EPOLLOUT;
    }

    kind as u32
}

pub(crate) type Event = libc::epoll_event;
pub(crate) type Events = Vec<Event>;

pub(crate) mod event {
    use std::os::unix::io::RawFd;

    use super::*;

    pub(crate) fn fd(event: &Event) -> RawFd {
        event.u64 as RawFd
    }

    pub(crate) fn is_readable(event: &Event) -> bool {
        // HUP and ERR wake the read path so it can observe EOF or the
        // pending socket error.
        (event.events as libc::c_int & (EPOLLIN | EPOLLRDHUP | EPOLLHUP | EPOLLERR)) != 0
    }

    pub(crate) fn is_writable(event: &Event) -> bool {
        (event.events as libc::c_int & (EPOLLOUT | EPOLLERR)) != 0
    }
}
