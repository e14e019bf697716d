use std::cell::{Cell, RefCell};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::os::unix::prelude::IntoRawFd;
use std::rc::Rc;

use evio::{EventLoop, INFINITE};

mod util;
use util::init;

#[test]
fn timer_runs_before_idle() {
    init();
    let mut el = EventLoop::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    el.add_timer(5, 1, move |_el, _id| o.borrow_mut().push("timer"))
        .unwrap();
    let o = order.clone();
    el.add_idle(1, move |_el, _id| o.borrow_mut().push("idle"));
    el.run().unwrap();

    assert_eq!(*order.borrow(), vec!["timer", "idle"]);
}

#[test]
fn idle_repeat_count_honored() {
    init();
    let mut el = EventLoop::new().unwrap();
    let runs = Rc::new(Cell::new(0u32));

    let r = runs.clone();
    el.add_idle(2, move |_el, _id| r.set(r.get() + 1));
    el.run().unwrap();

    assert_eq!(runs.get(), 2);
    assert_eq!(el.idle_count(), 0);
    assert_eq!(el.active_count(), 0);
}

#[test]
fn deleted_idle_never_runs() {
    init();
    let mut el = EventLoop::new().unwrap();
    let runs = Rc::new(Cell::new(0u32));

    let r = runs.clone();
    let id = el.add_idle(INFINITE, move |_el, _id| r.set(r.get() + 1));
    el.del_idle(id);
    el.del_idle(id);
    assert_eq!(el.idle_count(), 0);
    el.run().unwrap();

    assert_eq!(runs.get(), 0);
}

#[test]
fn idle_dispatch_is_lifo() {
    init();
    let mut el = EventLoop::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    el.add_idle(1, move |_el, _id| o.borrow_mut().push("first-added"));
    let o = order.clone();
    el.add_idle(1, move |_el, _id| o.borrow_mut().push("second-added"));
    el.run().unwrap();

    // Head-insert into the pending lane: latest to become pending fires
    // first.
    assert_eq!(*order.borrow(), vec!["second-added", "first-added"]);
}

#[test]
fn idle_starves_under_io_load() {
    init();
    let mut el = EventLoop::new().unwrap();

    let (loop_end, mut test_end) = UnixStream::pair().unwrap();
    // Enough buffered data that the descriptor stays readable for every one
    // of the small reads below.
    test_end.write_all(&[0u8; 4096]).unwrap();
    let fd = loop_end.into_raw_fd();

    let reads = Rc::new(Cell::new(0u32));
    let idles = Rc::new(Cell::new(0u32));

    let r = reads.clone();
    el.read(fd, 16, move |el, fd, data| {
        assert!(!data.is_empty());
        r.set(r.get() + 1);
        if r.get() == 20 {
            el.close(fd);
            el.stop();
        }
    })
    .unwrap();

    let i = idles.clone();
    el.add_idle(INFINITE, move |_el, _id| i.set(i.get() + 1));

    el.run().unwrap();

    assert_eq!(reads.get(), 20);
    // Every tick produced IO pendings, so the idle never got a turn.
    assert_eq!(idles.get(), 0);
}
