use std::cell::{Cell, RefCell};
use std::rc::Rc;

use evio::net::{create_tcp_client, create_tcp_server};
use evio::EventLoop;

mod util;
use util::init;

#[test]
fn echo_roundtrip() {
    init();
    let mut el = EventLoop::new().unwrap();
    let got = Rc::new(RefCell::new(Vec::new()));

    let listen_fd = create_tcp_server(&mut el, 0, |el, conn| {
        el.read(conn, 4096, |el, fd, data| {
            let data = data.to_vec();
            el.write(fd, &data).unwrap();
        })
        .unwrap();
    })
    .unwrap();
    let port = el.local_addr(listen_fd).unwrap().port();
    assert_eq!(el.io_count(), 1);

    let g = got.clone();
    let _client_fd = create_tcp_client(&mut el, "127.0.0.1", port, move |el, fd| {
        el.write(fd, b"hello").unwrap();
        let g = g.clone();
        el.read(fd, 4096, move |el, _fd, data| {
            g.borrow_mut().extend_from_slice(data);
            el.stop();
        })
        .unwrap();
    })
    .unwrap();

    el.run().unwrap();

    assert_eq!(&*got.borrow(), b"hello");
}

#[test]
fn close_in_read_callback() {
    init();
    let mut el = EventLoop::new().unwrap();

    let closes = Rc::new(Cell::new(0u32));
    let reads_after_close = Rc::new(Cell::new(0u32));
    // (io_count before close, io_count after close)
    let counts = Rc::new(Cell::new((0usize, 0usize)));

    let cl = closes.clone();
    let rac = reads_after_close.clone();
    let cnt = counts.clone();
    let listen_fd = create_tcp_server(&mut el, 0, move |el, conn| {
        let cl = cl.clone();
        el.set_close_callback(conn, move |_el, _fd| cl.set(cl.get() + 1));

        let rac = rac.clone();
        let cnt = cnt.clone();
        let closed = Rc::new(Cell::new(false));
        el.read(conn, 1024, move |el, fd, _data| {
            if closed.get() {
                rac.set(rac.get() + 1);
                return;
            }
            closed.set(true);
            let before = el.io_count();
            el.close(fd);
            cnt.set((before, el.io_count()));
            el.stop();
        })
        .unwrap();
    })
    .unwrap();
    let port = el.local_addr(listen_fd).unwrap().port();

    let _client_fd = create_tcp_client(&mut el, "127.0.0.1", port, |el, fd| {
        el.write(fd, b"ping").unwrap();
    })
    .unwrap();

    el.run().unwrap();

    // The close callback fired exactly once, no read callback ran after the
    // close, and the close released exactly one active IO handle.
    assert_eq!(closes.get(), 1);
    assert_eq!(reads_after_close.get(), 0);
    let (before, after) = counts.get();
    assert_eq!(after, before - 1);
}
