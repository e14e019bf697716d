//! TCP/UDP server and client constructors.
//!
//! Thin adapters over the boundary syscalls plus an IO-handle registration;
//! they only shorten call sites. The returned value is the raw fd, ready to
//! be used with the loop's IO APIs.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::os::unix::io::RawFd;

use crate::event_loop::EventLoop;
use crate::sys;

/// Resolve `host:port`, preferring an IPv4 address.
fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    let mut first = None;
    for addr in &mut addrs {
        if addr.is_ipv4() {
            return Ok(addr);
        }
        first.get_or_insert(addr);
    }
    first.ok_or_else(|| io::ErrorKind::AddrNotAvailable.into())
}

/// Create a TCP listener on `port` (all interfaces) and start accepting;
/// every new connection's fd is handed to `accept_cb`.
pub fn create_tcp_server<F>(el: &mut EventLoop, port: u16, accept_cb: F) -> io::Result<RawFd>
where
    F: FnMut(&mut EventLoop, RawFd) + 'static,
{
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let fd = sys::net::new_ip_socket(&addr, libc::SOCK_STREAM)?;
    let res = sys::net::set_reuseaddr(fd)
        .and_then(|_| sys::net::bind(fd, &addr))
        .and_then(|_| sys::net::listen(fd, libc::SOMAXCONN))
        .and_then(|_| el.accept(fd, accept_cb));
    match res {
        Ok(()) => Ok(fd),
        Err(e) => {
            sys::net::close(fd);
            Err(e)
        }
    }
}

/// Create a TCP client socket and start a nonblocking connect to
/// `host:port`; `connect_cb` fires once the connection is established.
pub fn create_tcp_client<F>(
    el: &mut EventLoop,
    host: &str,
    port: u16,
    connect_cb: F,
) -> io::Result<RawFd>
where
    F: FnMut(&mut EventLoop, RawFd) + 'static,
{
    let addr = resolve(host, port)?;
    let fd = sys::net::new_ip_socket(&addr, libc::SOCK_STREAM)?;
    el.set_peer_addr(fd, addr);
    match el.connect(fd, connect_cb) {
        Ok(()) => Ok(fd),
        // `connect` already closed the fd on failure.
        Err(e) => Err(e),
    }
}

/// Create a UDP socket bound to `port` (all interfaces). Follow up with
/// [`EventLoop::read`] to receive datagrams; the peer address of the handle
/// tracks the source of the last datagram received.
pub fn create_udp_server(el: &mut EventLoop, port: u16) -> io::Result<RawFd> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let fd = sys::net::new_ip_socket(&addr, libc::SOCK_DGRAM)?;
    match sys::net::set_reuseaddr(fd).and_then(|_| sys::net::bind(fd, &addr)) {
        Ok(()) => {
            el.io_get(fd);
            Ok(fd)
        }
        Err(e) => {
            sys::net::close(fd);
            Err(e)
        }
    }
}

/// Create a UDP socket with `host:port` as its stored peer address, so
/// [`EventLoop::write`] sends datagrams there.
pub fn create_udp_client(el: &mut EventLoop, host: &str, port: u16) -> io::Result<RawFd> {
    let addr = resolve(host, port)?;
    let fd = sys::net::new_ip_socket(&addr, libc::SOCK_DGRAM)?;
    el.set_peer_addr(fd, addr);
    Ok(fd)
}
