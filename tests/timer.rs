use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::time::Instant;

use evio::{EventLoop, LoopStatus, PeriodSpec, INFINITE};
use rand::Rng;

mod util;
use util::init;

#[test]
fn one_shot_fires_once() {
    init();
    let mut el = EventLoop::new().unwrap();
    let fired = Rc::new(Cell::new(0u32));
    let at_ms = Rc::new(Cell::new(0u128));
    let start = Instant::now();

    let f = fired.clone();
    let at = at_ms.clone();
    el.add_timer(50, 1, move |_el, _id| {
        f.set(f.get() + 1);
        at.set(start.elapsed().as_millis());
    })
    .unwrap();
    assert_eq!(el.timer_count(), 1);
    assert_eq!(el.active_count(), 1);

    el.run().unwrap();

    assert_eq!(fired.get(), 1);
    assert!(at_ms.get() >= 50, "fired after {}ms", at_ms.get());
    assert!(at_ms.get() < 500, "fired after {}ms", at_ms.get());
    assert_eq!(el.active_count(), 0);
    assert_eq!(el.status(), LoopStatus::Stop);
}

#[test]
fn repeat_count_honored() {
    init();
    let mut el = EventLoop::new().unwrap();
    let fired = Rc::new(Cell::new(0u32));

    let f = fired.clone();
    el.add_timer(5, 3, move |_el, _id| f.set(f.get() + 1))
        .unwrap();
    el.run().unwrap();

    assert_eq!(fired.get(), 3);
    assert_eq!(el.timer_count(), 0);
}

#[test]
fn zero_timeout_rejected() {
    init();
    let mut el = EventLoop::new().unwrap();
    let err = el.add_timer(0, 1, |_el, _id| {}).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    assert_eq!(el.timer_count(), 0);
    assert_eq!(el.active_count(), 0);
}

#[test]
fn deleted_timer_never_fires() {
    init();
    let mut el = EventLoop::new().unwrap();
    let fired = Rc::new(Cell::new(0u32));

    let f = fired.clone();
    let id = el
        .add_timer(20, 1, move |_el, _id| f.set(f.get() + 1))
        .unwrap();
    el.del_timer(id);
    // Idempotent.
    el.del_timer(id);
    assert_eq!(el.timer_count(), 0);

    // Something else keeps the loop alive past the deleted deadline.
    el.add_timer(60, 1, |_el, _id| {}).unwrap();
    el.run().unwrap();

    assert_eq!(fired.get(), 0);
}

#[test]
fn self_delete_in_callback() {
    init();
    let mut el = EventLoop::new().unwrap();
    let fired = Rc::new(Cell::new(0u32));

    let f = fired.clone();
    el.add_timer(5, INFINITE, move |el, id| {
        f.set(f.get() + 1);
        if f.get() == 4 {
            el.del_timer(id);
        }
    })
    .unwrap();
    el.run().unwrap();

    assert_eq!(fired.get(), 4);
}

#[test]
fn reset_defers_first_fire() {
    init();
    let mut el = EventLoop::new().unwrap();
    let start = Instant::now();
    let fired_at = Rc::new(Cell::new(0u128));

    let at = fired_at.clone();
    let long = el
        .add_timer(100, INFINITE, move |el, id| {
            at.set(start.elapsed().as_millis());
            el.del_timer(id);
        })
        .unwrap();
    // Halfway through, push the deadline out to a full interval from now.
    el.add_timer(50, 1, move |el, _id| el.reset_timer(long))
        .unwrap();
    el.run().unwrap();

    assert!(fired_at.get() >= 148, "fired at {}ms", fired_at.get());
    assert!(fired_at.get() < 400, "fired at {}ms", fired_at.get());
}

#[test]
fn many_timers_fire_in_deadline_order() {
    init();
    let mut el = EventLoop::new().unwrap();
    let fires = Rc::new(RefCell::new(Vec::new()));

    let mut rng = rand::rng();
    for _ in 0..1000 {
        let timeout = rng.random_range(1..=1000);
        let fires = fires.clone();
        el.add_timer(timeout, 1, move |el, _id| {
            fires.borrow_mut().push(el.now_hrtime());
        })
        .unwrap();
    }
    assert_eq!(el.timer_count(), 1000);
    el.run().unwrap();

    let fires = fires.borrow();
    assert_eq!(fires.len(), 1000);
    assert!(
        fires.windows(2).all(|w| w[0] <= w[1]),
        "fire times went backwards"
    );
}

#[test]
fn period_timer_registers_and_deletes() {
    init();
    let mut el = EventLoop::new().unwrap();
    let spec = PeriodSpec::new(-1, -1, -1, -1, -1).unwrap();
    let id = el.add_period(spec, INFINITE, |_el, _id| {}).unwrap();
    assert_eq!(el.timer_count(), 1);

    // Resetting is only defined for interval timers.
    el.reset_timer(id);

    el.del_timer(id);
    assert_eq!(el.timer_count(), 0);
    el.run().unwrap();
}

#[test]
fn impossible_period_rejected() {
    init();
    let mut el = EventLoop::new().unwrap();
    // April has no 31st.
    let spec = PeriodSpec::new(0, 0, 31, -1, 4).unwrap();
    let err = el.add_period(spec, 1, |_el, _id| {}).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    assert_eq!(el.timer_count(), 0);
}
