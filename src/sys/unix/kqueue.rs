use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

use crate::interest::Interest;

#[derive(Debug)]
pub(crate) struct Selector {
    kq: OwnedFd,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        // SAFETY: `kqueue(2)` ensures the fd is valid.
        let kq = unsafe { OwnedFd::from_raw_fd(syscall!(kqueue())?) };
        syscall!(fcntl(kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;
        Ok(Selector { kq })
    }

    /// Wait for events for at most `timeout`; `None` blocks indefinitely.
    ///
    /// A signal interrupting the wait is not an error: the call returns with
    /// an empty event set and the caller's tick proceeds as a timeout.
    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timespec = timeout.map(|to| libc::timespec {
            tv_sec: to.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            // `Duration::subsec_nanos` is guaranteed to be less than a
            // second, casting is safe.
            tv_nsec: to.subsec_nanos() as _,
        });
        let timespec = timespec
            .as_ref()
            .map(|ts| ts as *const libc::timespec)
            .unwrap_or(ptr::null());

        events.clear();
        match syscall!(kevent(
            self.kq.as_raw_fd(),
            ptr::null(),
            0,
            events.as_mut_ptr(),
            events.capacity() as _,
            timespec,
        )) {
            Ok(n_events) => {
                // SAFETY: `kevent(2)` ensures that `n_events` are assigned.
                unsafe { events.set_len(n_events as usize) };
                Ok(())
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn register(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if interest.is_readable() {
            self.change(fd, libc::EVFILT_READ, libc::EV_ADD)?;
        }
        if interest.is_writable() {
            self.change(fd, libc::EVFILT_WRITE, libc::EV_ADD)?;
        }
        Ok(())
    }

    pub fn reregister(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        // EV_ADD of a present filter is a modification, so arm the wanted
        // filters and drop the unwanted ones.
        if interest.is_readable() {
            self.change(fd, libc::EVFILT_READ, libc::EV_ADD)?;
        } else {
            self.delete(fd, libc::EVFILT_READ)?;
        }
        if interest.is_writable() {
            self.change(fd, libc::EVFILT_WRITE, libc::EV_ADD)?;
        } else {
            self.delete(fd, libc::EVFILT_WRITE)?;
        }
        Ok(())
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let read = self.delete(fd, libc::EVFILT_READ);
        let write = self.delete(fd, libc::EVFILT_WRITE);
        read.and(write)
    }

    fn change(&self, fd: RawFd, filter: Filter, flags: Flags) -> io::Result<()> {
        let change = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        syscall!(kevent(
            self.kq.as_raw_fd(),
            &change,
            1,
            ptr::null_mut(),
            0,
            ptr::null(),
        ))
        .map(|_| ())
    }

    fn delete(&self, fd: RawFd, filter: Filter) -> io::Result<()> {
        match self.change(fd, filter, libc::EV_DELETE) {
            // The filter was never armed for this fd.
            Err(ref e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            res => res,
        }
    }
}

#[cfg(not(target_os = "netbsd"))]
type Filter = libc::c_short;
#[cfg(target_os = "netbsd")]
type Filter = u32;

#[cfg(not(target_os = "netbsd"))]
type Flags = libc::c_ushort;
#[cfg(target_os = "netbsd")]
type Flags = u32;

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.kq.as_raw_fd()
    }
}

pub(crate) type Event = libc::kevent;
pub(crate) type Events = Vec<Event>;

pub(crate) mod event {
    use std::os::unix::io::RawFd;

    use super::*;

    pub(crate) fn fd(event: &Event) -> RawFd {
        event.ident as RawFd
    }

    pub(crate) fn is_readable(event: &Event) -> bool {
        event.filter == libc::EVFILT_READ
    }

    pub(crate) fn is_writable(event: &Event) -> bool {
        event.filter == libc::EVFILT_WRITE
    }
}
