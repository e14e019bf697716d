use std::cell::Cell;
use std::rc::Rc;

use evio::{EventLoop, LoopStatus, INFINITE};

mod util;
use util::init;

#[test]
fn run_without_handles_returns() {
    init();
    let mut el = EventLoop::new().unwrap();
    el.run().unwrap();
    assert_eq!(el.status(), LoopStatus::Stop);
    assert!(el.tick_count() >= 1);
}

#[test]
fn pause_and_resume_outside_running_are_noops() {
    init();
    let mut el = EventLoop::new().unwrap();
    assert_eq!(el.status(), LoopStatus::Stop);
    el.pause();
    assert_eq!(el.status(), LoopStatus::Stop);
    el.resume();
    assert_eq!(el.status(), LoopStatus::Stop);
}

#[test]
fn stop_from_callback() {
    init();
    let mut el = EventLoop::new().unwrap();
    let fired = Rc::new(Cell::new(0u32));

    let f = fired.clone();
    el.add_timer(5, INFINITE, move |el, _id| {
        f.set(f.get() + 1);
        if f.get() == 3 {
            el.stop();
        }
    })
    .unwrap();
    el.run().unwrap();

    assert_eq!(fired.get(), 3);
    assert!(el.tick_count() >= 3);
    assert_eq!(el.status(), LoopStatus::Stop);
    // Run cleanup released the still-registered timer.
    assert_eq!(el.timer_count(), 0);
    assert_eq!(el.active_count(), 0);
}

#[test]
fn pause_observable_from_callback() {
    init();
    let mut el = EventLoop::new().unwrap();

    el.add_timer(5, 1, |el, _id| {
        assert_eq!(el.status(), LoopStatus::Running);
        el.pause();
        assert_eq!(el.status(), LoopStatus::Pause);
        el.resume();
        assert_eq!(el.status(), LoopStatus::Running);
    })
    .unwrap();
    el.run().unwrap();
    assert_eq!(el.status(), LoopStatus::Stop);
}

#[test]
fn counters_track_handles() {
    init();
    let mut el = EventLoop::new().unwrap();

    let t = el.add_timer(1000, 1, |_el, _id| {}).unwrap();
    let i = el.add_idle(INFINITE, |_el, _id| {});
    assert_eq!(el.timer_count(), 1);
    assert_eq!(el.idle_count(), 1);
    assert_eq!(el.io_count(), 0);
    assert_eq!(
        el.active_count(),
        el.timer_count() + el.idle_count() + el.io_count()
    );

    el.del_timer(t);
    el.del_idle(i);
    assert_eq!(el.active_count(), 0);
    assert_eq!(el.pending_count(), 0);
}

#[test]
fn pending_queue_is_drained_every_tick() {
    init();
    let mut el = EventLoop::new().unwrap();
    let checked = Rc::new(Cell::new(0u32));

    let c = checked.clone();
    el.add_timer(5, 3, move |el, _id| {
        // This callback is being dispatched, so its own pending entry is
        // still accounted for; nothing else may linger from prior ticks.
        assert!(el.pending_count() <= 1);
        c.set(c.get() + 1);
    })
    .unwrap();
    el.run().unwrap();

    assert_eq!(checked.get(), 3);
    assert_eq!(el.pending_count(), 0);
}
