use std::cell::RefCell;
use std::rc::Rc;

use evio::net::{create_udp_client, create_udp_server};
use evio::{EventLoop, IoKind};

mod util;
use util::init;

#[test]
fn echo_roundtrip() {
    init();
    let mut el = EventLoop::new().unwrap();
    let got = Rc::new(RefCell::new(Vec::new()));

    let server_fd = create_udp_server(&mut el, 0).unwrap();
    el.read(server_fd, 2048, |el, fd, data| {
        // The source of the datagram became the handle's peer; echo back.
        let data = data.to_vec();
        el.write(fd, &data).unwrap();
    })
    .unwrap();
    // The bound address is known once the handle registered.
    let port = el.local_addr(server_fd).unwrap().port();
    assert_eq!(el.io_kind(server_fd), Some(IoKind::Udp));

    let client_fd = create_udp_client(&mut el, "127.0.0.1", port).unwrap();
    let g = got.clone();
    el.read(client_fd, 2048, move |el, _fd, data| {
        g.borrow_mut().extend_from_slice(data);
        el.stop();
    })
    .unwrap();
    el.write(client_fd, b"ping").unwrap();

    el.run().unwrap();

    assert_eq!(&*got.borrow(), b"ping");
}
