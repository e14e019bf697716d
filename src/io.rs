//! Per-descriptor IO handles and the fd-indexed IO table.
//!
//! An [`IoHandle`] is created lazily the first time a descriptor is touched
//! and lives in a sparse table indexed by fd. Closing or fully
//! de-subscribing a descriptor deactivates and resets the handle but leaves
//! it in the table: the slot is reused by the next owner of the same fd,
//! which keeps a stale fd from ever reaching freed state.

use std::collections::VecDeque;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use log::trace;

use crate::event::{
    AcceptCallback, CloseCallback, ConnectCallback, EventRef, Priority, ReadCallback, WriteCallback,
};
use crate::event_loop::EventLoop;
use crate::interest::Interest;
use crate::sys;

/// Initial size of the fd-indexed IO table.
pub(crate) const IO_ARRAY_INIT_SIZE: usize = 64;

pub(crate) const ALL_EVENTS: Interest = Interest::READABLE.add(Interest::WRITABLE);

// Readiness classes reported for one dispatch.
pub(crate) const READ_EVENT: u8 = 0b01;
pub(crate) const WRITE_EVENT: u8 = 0b10;

/// What kind of descriptor an IO handle wraps, probed on first registration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoKind {
    /// Not yet probed.
    Unknown,
    /// `SOCK_STREAM` socket.
    Tcp,
    /// `SOCK_DGRAM` socket.
    Udp,
    /// `SOCK_RAW` socket.
    Ip,
    /// Socket of another type.
    Socket,
    /// Regular (non-socket) descriptor.
    File,
    /// Fd 0.
    Stdin,
    /// Fd 1.
    Stdout,
    /// Fd 2.
    Stderr,
}

impl IoKind {
    /// True for descriptors probed as sockets of any type.
    pub fn is_socket(self) -> bool {
        matches!(self, IoKind::Tcp | IoKind::Udp | IoKind::Ip | IoKind::Socket)
    }

    /// True for the three standard descriptors.
    pub fn is_stdio(self) -> bool {
        matches!(self, IoKind::Stdin | IoKind::Stdout | IoKind::Stderr)
    }

    fn is_datagram(self) -> bool {
        matches!(self, IoKind::Udp | IoKind::Ip)
    }
}

pub(crate) struct WriteBuf {
    pub(crate) data: Vec<u8>,
    pub(crate) off: usize,
}

/// An IO handle. Embeds the common event header.
pub(crate) struct IoHandle {
    pub(crate) fd: RawFd,
    pub(crate) kind: IoKind,
    pub(crate) priority: Priority,
    pub(crate) active: bool,
    pub(crate) pending: bool,
    pub(crate) closed: bool,
    pub(crate) pending_next: Option<EventRef>,
    /// Current selector subscription; `None` means not registered.
    pub(crate) events: Option<Interest>,
    /// Readiness reported for the current dispatch.
    pub(crate) revents: u8,
    /// Last raw OS error observed on this descriptor.
    pub(crate) error: i32,
    // Role flags.
    pub(crate) accept: bool,
    pub(crate) connect: bool,
    pub(crate) read_cb: Option<ReadCallback>,
    pub(crate) write_cb: Option<WriteCallback>,
    pub(crate) close_cb: Option<CloseCallback>,
    pub(crate) accept_cb: Option<AcceptCallback>,
    pub(crate) connect_cb: Option<ConnectCallback>,
    pub(crate) readbuf: Vec<u8>,
    pub(crate) write_queue: VecDeque<WriteBuf>,
    pub(crate) local_addr: Option<SocketAddr>,
    pub(crate) peer_addr: Option<SocketAddr>,
}

impl IoHandle {
    pub(crate) fn new(fd: RawFd) -> IoHandle {
        IoHandle {
            fd,
            kind: IoKind::Unknown,
            priority: Priority::Normal,
            active: false,
            pending: false,
            closed: false,
            pending_next: None,
            events: None,
            revents: 0,
            error: 0,
            accept: false,
            connect: false,
            read_cb: None,
            write_cb: None,
            close_cb: None,
            accept_cb: None,
            connect_cb: None,
            readbuf: Vec::new(),
            write_queue: VecDeque::new(),
            local_addr: None,
            peer_addr: None,
        }
    }
}

/// Size of the IO table able to hold `fd`: the next power of two above it,
/// or twice the fd when it already is one.
pub(crate) fn io_table_size(fd: usize) -> usize {
    let next = fd.next_power_of_two();
    if next > fd {
        next
    } else {
        2 * fd
    }
}

fn probe_kind(fd: RawFd) -> IoKind {
    match sys::net::socket_type(fd) {
        Ok(libc::SOCK_STREAM) => IoKind::Tcp,
        Ok(libc::SOCK_DGRAM) => IoKind::Udp,
        Ok(libc::SOCK_RAW) => IoKind::Ip,
        Ok(_) => IoKind::Socket,
        Err(ref e) if e.raw_os_error() == Some(libc::ENOTSOCK) => match fd {
            0 => IoKind::Stdin,
            1 => IoKind::Stdout,
            2 => IoKind::Stderr,
            _ => IoKind::File,
        },
        Err(_) => IoKind::Unknown,
    }
}

/// First-registration setup: probe the descriptor kind and, for sockets,
/// switch to nonblocking mode and materialize the address pair.
fn io_reset(io: &mut IoHandle) {
    io.kind = probe_kind(io.fd);
    if io.kind.is_socket() {
        if let Err(e) = sys::net::set_nonblocking(io.fd) {
            trace!("set_nonblocking fd={} failed: {}", io.fd, e);
        }
        match sys::net::local_addr(io.fd) {
            Ok(addr) => io.local_addr = Some(addr),
            Err(e) => trace!("getsockname fd={} failed: {}", io.fd, e),
        }
        // An accepted connection already has a peer; clients fill theirs via
        // `set_peer_addr` or `recvfrom`.
        if io.kind == IoKind::Tcp && io.peer_addr.is_none() {
            match sys::net::peer_addr(io.fd) {
                Ok(addr) => io.peer_addr = Some(addr),
                Err(e) => trace!("getpeername fd={} failed: {}", io.fd, e),
            }
        }
    }
}

/// Reset per-connection state so the slot can serve the next user of the fd.
/// The event-header fields (`pending`, `pending_next`, `priority`) and the
/// address storage survive.
fn io_deinit(io: &mut IoHandle) {
    io.kind = IoKind::Unknown;
    io.closed = false;
    io.events = None;
    io.revents = 0;
    io.error = 0;
    io.accept = false;
    io.connect = false;
    io.read_cb = None;
    io.write_cb = None;
    io.close_cb = None;
    io.accept_cb = None;
    io.connect_cb = None;
    io.readbuf = Vec::new();
    io.write_queue.clear();
}

fn would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl EventLoop {
    pub(crate) fn io(&self, fd: RawFd) -> Option<&IoHandle> {
        self.ios.get(fd as usize).and_then(|s| s.as_deref())
    }

    pub(crate) fn io_mut(&mut self, fd: RawFd) -> Option<&mut IoHandle> {
        self.ios.get_mut(fd as usize).and_then(|s| s.as_deref_mut())
    }

    /// Fetch the handle for `fd`, lazily allocating its table slot.
    pub(crate) fn io_get(&mut self, fd: RawFd) -> &mut IoHandle {
        let idx = fd as usize;
        if self.ios.is_empty() {
            self.ios.resize_with(IO_ARRAY_INIT_SIZE, || None);
        }
        if idx >= self.ios.len() {
            let newsize = io_table_size(idx);
            self.ios.resize_with(newsize, || None);
        }
        self.ios[idx]
            .get_or_insert_with(|| Box::new(IoHandle::new(fd)))
            .as_mut()
    }

    /// Subscribe `fd` to `interest` with the readiness selector.
    ///
    /// On the first registration of an inactive handle the descriptor kind
    /// is probed and sockets are switched to nonblocking mode. Subsequent
    /// calls only widen the subscription.
    pub fn add_io(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if fd < 0 {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        self.ensure_selector()?;

        let was_active = {
            let io = self.io_get(fd);
            io.active
        };
        if !was_active {
            let io = self.io_mut(fd).unwrap();
            io_reset(io);
            io.active = true;
            trace!("add io fd={} kind={:?}", fd, io.kind);
            self.nios += 1;
            self.nactives += 1;
        }

        let old = self.io(fd).unwrap().events;
        let new = match old {
            Some(e) => e | interest,
            None => interest,
        };
        if old != Some(new) {
            let selector = self.selector.as_ref().unwrap();
            match old {
                None => selector.register(fd, new)?,
                Some(_) => selector.reregister(fd, new)?,
            }
            self.io_mut(fd).unwrap().events = Some(new);
        }
        Ok(())
    }

    /// Drop `interest` from the subscription of `fd`.
    ///
    /// When the subscription empties the handle is deactivated and reset,
    /// but its table slot is retained for reuse by the same fd.
    pub fn del_io(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let old = match self.io(fd) {
            Some(io) if io.active => match io.events {
                Some(e) => e,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
        let remaining = old.remove(interest);
        if remaining == Some(old) {
            return Ok(());
        }
        trace!("del io fd={} events={:?} remaining={:?}", fd, old, remaining);

        if let Some(selector) = self.selector.as_ref() {
            let res = match remaining {
                Some(r) => selector.reregister(fd, r),
                None => selector.deregister(fd),
            };
            if let Err(e) = res {
                trace!("selector update fd={} failed: {}", fd, e);
            }
        }

        let io = self.io_mut(fd).unwrap();
        io.events = remaining;
        if remaining.is_none() {
            io.active = false;
            io_deinit(io);
            self.nios -= 1;
            self.nactives -= 1;
        }
        Ok(())
    }

    /// Continuously read from `fd`, delivering each chunk to `cb`.
    ///
    /// The loop owns a read buffer of `buf_len` bytes for the descriptor;
    /// every time the fd turns readable, one read is issued and the filled
    /// prefix is passed to the callback. A zero-length read on a stream
    /// descriptor is end-of-file and closes the handle.
    pub fn read<F>(&mut self, fd: RawFd, buf_len: usize, cb: F) -> io::Result<()>
    where
        F: FnMut(&mut EventLoop, RawFd, &[u8]) + 'static,
    {
        if fd < 0 || buf_len == 0 {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        {
            let io = self.io_get(fd);
            io.readbuf = vec![0; buf_len];
            io.read_cb = Some(Box::new(cb));
        }
        self.add_io(fd, Interest::READABLE)
    }

    /// Write `data` to `fd`.
    ///
    /// An immediate nonblocking write is attempted first; whatever does not
    /// fit is queued and flushed as the descriptor turns writable. The write
    /// callback (see [`set_write_callback`]) fires once per fully flushed
    /// chunk. UDP handles send to their stored peer address.
    ///
    /// [`set_write_callback`]: EventLoop::set_write_callback
    pub fn write(&mut self, fd: RawFd, data: &[u8]) -> io::Result<()> {
        if fd < 0 {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        {
            let io = self.io_get(fd);
            if io.kind == IoKind::Unknown {
                io.kind = probe_kind(fd);
            }
        }

        let mut nwritten = 0;
        if self.io(fd).unwrap().write_queue.is_empty() {
            match self.io_try_write(fd, data) {
                Ok(n) => nwritten = n,
                Err(ref e) if would_block(e) => {}
                Err(e) => {
                    if let Some(io) = self.io_mut(fd) {
                        io.error = e.raw_os_error().unwrap_or(0);
                    }
                    self.close(fd);
                    return Err(e);
                }
            }
        }

        if nwritten == data.len() {
            self.io_notify_write(fd, nwritten);
            return Ok(());
        }

        let io = self.io_mut(fd).unwrap();
        io.write_queue.push_back(WriteBuf {
            data: data[nwritten..].to_vec(),
            off: 0,
        });
        self.add_io(fd, Interest::WRITABLE)
    }

    /// Accept connections on the listening socket `fd`, passing each new
    /// connection's descriptor to `cb`.
    pub fn accept<F>(&mut self, fd: RawFd, cb: F) -> io::Result<()>
    where
        F: FnMut(&mut EventLoop, RawFd) + 'static,
    {
        if fd < 0 {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        {
            let io = self.io_get(fd);
            io.accept = true;
            io.accept_cb = Some(Box::new(cb));
        }
        self.add_io(fd, Interest::READABLE)
    }

    /// Start a nonblocking connect on `fd` towards its stored peer address
    /// (see [`set_peer_addr`]); `cb` fires once the connection completes.
    ///
    /// [`set_peer_addr`]: EventLoop::set_peer_addr
    pub fn connect<F>(&mut self, fd: RawFd, cb: F) -> io::Result<()>
    where
        F: FnMut(&mut EventLoop, RawFd) + 'static,
    {
        if fd < 0 {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        let peer = {
            let io = self.io_get(fd);
            io.connect = true;
            io.connect_cb = Some(Box::new(cb));
            io.peer_addr
        };
        let peer = match peer {
            Some(peer) => peer,
            None => {
                let io = self.io_mut(fd).unwrap();
                io.connect = false;
                io.connect_cb = None;
                return Err(io::ErrorKind::NotConnected.into());
            }
        };
        self.add_io(fd, Interest::WRITABLE)?;
        match sys::net::connect(fd, &peer) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(io) = self.io_mut(fd) {
                    io.error = e.raw_os_error().unwrap_or(0);
                }
                self.close(fd);
                Err(e)
            }
        }
    }

    /// Install the callback fired after each fully flushed write chunk.
    pub fn set_write_callback<F>(&mut self, fd: RawFd, cb: F)
    where
        F: FnMut(&mut EventLoop, RawFd, usize) + 'static,
    {
        self.io_get(fd).write_cb = Some(Box::new(cb));
    }

    /// Install the callback fired exactly once when the handle closes.
    pub fn set_close_callback<F>(&mut self, fd: RawFd, cb: F)
    where
        F: FnMut(&mut EventLoop, RawFd) + 'static,
    {
        self.io_get(fd).close_cb = Some(Box::new(cb));
    }

    /// Close the handle for `fd`.
    ///
    /// Idempotent. Fires the close callback (once), unsubscribes the
    /// descriptor and, for non-stdio descriptors, closes the fd itself. No
    /// further callbacks fire for this handle afterwards.
    pub fn close(&mut self, fd: RawFd) {
        let (kind, cb) = match self.io_mut(fd) {
            Some(io) if !io.closed => {
                io.closed = true;
                (io.kind, io.close_cb.take())
            }
            _ => return,
        };
        trace!("close fd={}", fd);
        if let Some(mut cb) = cb {
            cb(self, fd);
        }
        let _ = self.del_io(fd, ALL_EVENTS);
        if !kind.is_stdio() {
            sys::net::close(fd);
        }
    }

    /// Local address of `fd`, if known.
    pub fn local_addr(&self, fd: RawFd) -> Option<SocketAddr> {
        self.io(fd).and_then(|io| io.local_addr)
    }

    /// Peer address of `fd`, if known.
    pub fn peer_addr(&self, fd: RawFd) -> Option<SocketAddr> {
        self.io(fd).and_then(|io| io.peer_addr)
    }

    /// Store the local address for `fd`.
    pub fn set_local_addr(&mut self, fd: RawFd, addr: SocketAddr) {
        self.io_get(fd).local_addr = Some(addr);
    }

    /// Store the peer address for `fd`, used by [`connect`] and UDP writes.
    ///
    /// [`connect`]: EventLoop::connect
    pub fn set_peer_addr(&mut self, fd: RawFd, addr: SocketAddr) {
        self.io_get(fd).peer_addr = Some(addr);
    }

    /// Probed kind of the handle for `fd`.
    pub fn io_kind(&self, fd: RawFd) -> Option<IoKind> {
        self.io(fd).map(|io| io.kind)
    }

    /// Last raw OS error observed on `fd`, if any.
    pub fn last_error(&self, fd: RawFd) -> Option<i32> {
        self.io(fd).map(|io| io.error).filter(|&e| e != 0)
    }

    // ===== readiness dispatch =====

    /// Dispatch the readiness recorded on the handle for this tick.
    pub(crate) fn io_handle_events(&mut self, fd: RawFd) {
        let (revents, is_accept, is_connect) = match self.io_mut(fd) {
            Some(io) => {
                let r = io.revents;
                io.revents = 0;
                (r, io.accept, io.connect)
            }
            None => return,
        };

        if revents & READ_EVENT != 0 {
            if is_accept {
                self.io_do_accept(fd);
            } else {
                self.io_do_read(fd);
            }
        }

        // The read side may have closed or deactivated the handle.
        let alive = self
            .io(fd)
            .map_or(false, |io| io.active && !io.closed);
        if revents & WRITE_EVENT != 0 && alive {
            if is_connect {
                self.io_do_connect_done(fd);
            } else {
                self.io_do_write_flush(fd);
            }
        }
    }

    fn io_do_accept(&mut self, fd: RawFd) {
        loop {
            match sys::net::accept(fd) {
                Ok((conn, peer)) => {
                    trace!("accept fd={} conn={} peer={}", fd, conn, peer);
                    {
                        let io = self.io_get(conn);
                        io.kind = IoKind::Tcp;
                        io.peer_addr = Some(peer);
                    }
                    let cb = self.io_mut(fd).and_then(|io| io.accept_cb.take());
                    let mut cb = match cb {
                        Some(cb) => cb,
                        None => return,
                    };
                    cb(self, conn);
                    match self.io_mut(fd) {
                        Some(io) if io.active && !io.closed => {
                            if io.accept_cb.is_none() {
                                io.accept_cb = Some(cb);
                            }
                        }
                        // The callback closed the listener.
                        _ => return,
                    }
                }
                Err(ref e) if would_block(e) => return,
                Err(e) => {
                    if let Some(io) = self.io_mut(fd) {
                        io.error = e.raw_os_error().unwrap_or(0);
                    }
                    self.close(fd);
                    return;
                }
            }
        }
    }

    fn io_do_read(&mut self, fd: RawFd) {
        let (mut buf, kind) = match self.io_mut(fd) {
            Some(io) if !io.closed && !io.readbuf.is_empty() => {
                (mem::take(&mut io.readbuf), io.kind)
            }
            _ => return,
        };

        let res = if kind.is_datagram() {
            sys::net::recvfrom(fd, &mut buf)
        } else {
            sys::net::read(fd, &mut buf).map(|n| (n, None))
        };

        match res {
            Ok((n, peer)) => {
                if let Some(peer) = peer {
                    if let Some(io) = self.io_mut(fd) {
                        io.peer_addr = Some(peer);
                    }
                }
                if n == 0 && !kind.is_datagram() {
                    // EOF.
                    self.io_restore_readbuf(fd, buf);
                    self.close(fd);
                    return;
                }
                let cb = self.io_mut(fd).and_then(|io| io.read_cb.take());
                if let Some(mut cb) = cb {
                    cb(self, fd, &buf[..n]);
                    if let Some(io) = self.io_mut(fd) {
                        if io.read_cb.is_none() {
                            io.read_cb = Some(cb);
                        }
                    }
                }
                self.io_restore_readbuf(fd, buf);
            }
            Err(ref e) if would_block(e) => self.io_restore_readbuf(fd, buf),
            Err(e) => {
                self.io_restore_readbuf(fd, buf);
                if let Some(io) = self.io_mut(fd) {
                    io.error = e.raw_os_error().unwrap_or(0);
                }
                self.close(fd);
            }
        }
    }

    fn io_restore_readbuf(&mut self, fd: RawFd, buf: Vec<u8>) {
        if let Some(io) = self.io_mut(fd) {
            // The callback may have installed a fresh buffer via `read`.
            if io.readbuf.is_empty() {
                io.readbuf = buf;
            }
        }
    }

    fn io_do_connect_done(&mut self, fd: RawFd) {
        let cb = match self.io_mut(fd) {
            Some(io) => {
                io.connect = false;
                io.connect_cb.take()
            }
            None => return,
        };
        match sys::net::take_socket_error(fd) {
            Ok(()) => {
                trace!("connect complete fd={}", fd);
                if let Some(io) = self.io_mut(fd) {
                    io.local_addr = sys::net::local_addr(fd).ok().or(io.local_addr);
                }
                let _ = self.del_io(fd, Interest::WRITABLE);
                if let Some(mut cb) = cb {
                    cb(self, fd);
                }
            }
            Err(e) => {
                if let Some(io) = self.io_mut(fd) {
                    io.error = e.raw_os_error().unwrap_or(0);
                }
                self.close(fd);
            }
        }
    }

    fn io_do_write_flush(&mut self, fd: RawFd) {
        loop {
            let chunk = self.io_mut(fd).and_then(|io| io.write_queue.pop_front());
            let mut chunk = match chunk {
                Some(chunk) => chunk,
                None => {
                    // Queue drained.
                    let _ = self.del_io(fd, Interest::WRITABLE);
                    return;
                }
            };
            match self.io_try_write(fd, &chunk.data[chunk.off..]) {
                Ok(n) => {
                    chunk.off += n;
                    if chunk.off >= chunk.data.len() {
                        let len = chunk.data.len();
                        self.io_notify_write(fd, len);
                        if self.io(fd).map_or(true, |io| io.closed || !io.active) {
                            return;
                        }
                    } else {
                        if let Some(io) = self.io_mut(fd) {
                            io.write_queue.push_front(chunk);
                        }
                        return;
                    }
                }
                Err(ref e) if would_block(e) => {
                    if let Some(io) = self.io_mut(fd) {
                        io.write_queue.push_front(chunk);
                    }
                    return;
                }
                Err(e) => {
                    if let Some(io) = self.io_mut(fd) {
                        io.error = e.raw_os_error().unwrap_or(0);
                    }
                    self.close(fd);
                    return;
                }
            }
        }
    }

    fn io_try_write(&mut self, fd: RawFd, data: &[u8]) -> io::Result<usize> {
        let (kind, peer) = match self.io(fd) {
            Some(io) => (io.kind, io.peer_addr),
            None => return Err(io::ErrorKind::NotFound.into()),
        };
        if kind.is_datagram() {
            match peer {
                Some(peer) => sys::net::sendto(fd, data, &peer),
                None => Err(io::ErrorKind::NotConnected.into()),
            }
        } else if kind.is_socket() {
            sys::net::send(fd, data)
        } else {
            sys::net::write(fd, data)
        }
    }

    fn io_notify_write(&mut self, fd: RawFd, n: usize) {
        let cb = self.io_mut(fd).and_then(|io| io.write_cb.take());
        if let Some(mut cb) = cb {
            cb(self, fd, n);
            if let Some(io) = self.io_mut(fd) {
                if io.write_cb.is_none() {
                    io.write_cb = Some(cb);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::io_table_size;

    #[test]
    fn table_growth() {
        assert_eq!(io_table_size(65), 128);
        assert_eq!(io_table_size(100), 128);
        // An exact power of two doubles instead.
        assert_eq!(io_table_size(128), 256);
        assert_eq!(io_table_size(1000), 1024);
    }
}
