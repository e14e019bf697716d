//! The loop driver: tick orchestration, block-time math and dispatch.

use std::fmt;
use std::io;
use std::thread;
use std::time::Duration;

use log::{error, trace};

use crate::event::{EventKind, EventRef, Priority, INFINITE};
use crate::idle::{IdleEntry, IdleId};
use crate::io::{IoHandle, READ_EVENT, WRITE_EVENT};
use crate::sys;
use crate::time::{gethrtime, next_period_usec, wall_time};
use crate::timer::{PeriodSpec, TimerEntry, TimerId};
use crate::util::{Slab, TimerHeap};

/// Sleep per iteration while the loop is paused.
const PAUSE_TIME: Duration = Duration::from_millis(10);

/// Upper bound on how long one tick may block waiting for readiness.
const MAX_BLOCK_TIME_MS: u64 = 1000;

/// Capacity of the reused selector event buffer.
const EVENTS_CAPACITY: usize = 1024;

/// Run state of an [`EventLoop`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoopStatus {
    /// Not running; `run` has not been called or has returned.
    Stop,
    /// Ticking.
    Running,
    /// Ticking suspended; the loop sleeps instead of dispatching.
    Pause,
}

/// A single-threaded callback event loop.
///
/// One `EventLoop` multiplexes three kinds of work onto one cooperative
/// scheduler: fd readiness (via the OS selector), timers (one-shot,
/// interval and calendar-periodic) and idle handlers. Each tick polls for
/// readiness no longer than the nearest timer deadline, then dispatches
/// ready timers, idles (only on ticks that produced no other work) and
/// finally all pending callbacks in priority order.
///
/// All handle APIs must be called from the thread driving [`run`]; the loop
/// holds no locks. Callbacks run synchronously on that thread and must not
/// block.
///
/// [`run`]: EventLoop::run
///
/// # Examples
///
/// ```
/// # fn main() -> std::io::Result<()> {
/// use evio::EventLoop;
///
/// let mut el = EventLoop::new()?;
/// el.add_timer(10, 1, |_el, _id| println!("fired"))?;
/// // Runs until no active handles remain: here, after one firing.
/// el.run()?;
/// # Ok(())
/// # }
/// ```
pub struct EventLoop {
    pub(crate) status: LoopStatus,
    // Per-priority pending chains, drained every tick.
    pub(crate) pendings: [Option<EventRef>; Priority::COUNT],
    pub(crate) npendings: usize,
    pub(crate) nactives: usize,
    pub(crate) nios: usize,
    pub(crate) ntimers: usize,
    pub(crate) nidles: usize,
    pub(crate) timers: Slab<TimerEntry>,
    pub(crate) timer_heap: TimerHeap,
    pub(crate) idles: Slab<IdleEntry>,
    pub(crate) idle_head: Option<usize>,
    pub(crate) idle_tail: Option<usize>,
    // Sparse, fd-indexed. Slots are reused, never freed while running.
    pub(crate) ios: Vec<Option<Box<IoHandle>>>,
    // Lazy: created on the first `add_io`.
    pub(crate) selector: Option<sys::Selector>,
    pub(crate) events: sys::Events,
    // Wall epoch seconds at construction; anchors the monotonic clock.
    pub(crate) start_time: u64,
    pub(crate) start_hrtime: u64,
    pub(crate) cur_hrtime: u64,
    pub(crate) end_hrtime: u64,
    pub(crate) loop_cnt: u64,
}

impl EventLoop {
    /// Create a new, empty loop.
    pub fn new() -> io::Result<EventLoop> {
        let start_hrtime = gethrtime();
        Ok(EventLoop {
            status: LoopStatus::Stop,
            pendings: [None; Priority::COUNT],
            npendings: 0,
            nactives: 0,
            nios: 0,
            ntimers: 0,
            nidles: 0,
            timers: Slab::new(),
            timer_heap: TimerHeap::new(),
            idles: Slab::new(),
            idle_head: None,
            idle_tail: None,
            ios: Vec::new(),
            selector: None,
            events: Vec::with_capacity(EVENTS_CAPACITY),
            start_time: wall_time(),
            start_hrtime,
            cur_hrtime: start_hrtime,
            end_hrtime: 0,
            loop_cnt: 0,
        })
    }

    /// Current run state.
    pub fn status(&self) -> LoopStatus {
        self.status
    }

    /// Number of active handles of all kinds.
    pub fn active_count(&self) -> usize {
        self.nactives
    }

    /// Number of active IO handles.
    pub fn io_count(&self) -> usize {
        self.nios
    }

    /// Number of active timers.
    pub fn timer_count(&self) -> usize {
        self.ntimers
    }

    /// Number of active idle handlers.
    pub fn idle_count(&self) -> usize {
        self.nidles
    }

    /// Number of callbacks queued for dispatch in the current tick.
    pub fn pending_count(&self) -> usize {
        self.npendings
    }

    /// Number of ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.loop_cnt
    }

    /// Monotonic microseconds from loop creation to the end of the last
    /// [`run`](EventLoop::run); zero while the loop has never finished.
    pub fn run_time_usec(&self) -> u64 {
        self.end_hrtime.saturating_sub(self.start_hrtime)
    }

    /// The loop's cached clock: wall-anchored monotonic microseconds.
    ///
    /// Refreshed at tick start and again after the readiness poll; all timer
    /// math within a tick uses this cached value.
    pub fn now_hrtime(&self) -> u64 {
        self.start_time * 1_000_000 + (self.cur_hrtime - self.start_hrtime)
    }

    pub(crate) fn update_time(&mut self) {
        self.cur_hrtime = gethrtime();
    }

    pub(crate) fn ensure_selector(&mut self) -> io::Result<()> {
        if self.selector.is_none() {
            self.selector = Some(sys::Selector::new()?);
        }
        Ok(())
    }

    // ===== run / status machine =====

    /// Run the loop until stopped or out of active handles.
    ///
    /// Each tick: poll for readiness (bounded by the nearest timer
    /// deadline, at most one second), process expired timers, process idles
    /// if the tick produced no other pending work, then drain the pending
    /// queue highest priority lane first. On exit all remaining handles are
    /// released; non-stdio IO handles are closed.
    pub fn run(&mut self) -> io::Result<()> {
        self.loop_cnt = 0;
        self.status = LoopStatus::Running;
        while self.status != LoopStatus::Stop {
            if self.status == LoopStatus::Pause {
                thread::sleep(PAUSE_TIME);
                self.update_time();
                continue;
            }
            self.loop_cnt += 1;
            if self.nactives == 0 {
                break;
            }
            self.process_events();
        }
        self.status = LoopStatus::Stop;
        self.end_hrtime = gethrtime();
        self.cleanup();
        Ok(())
    }

    /// Make the next loop iteration exit the tick loop.
    pub fn stop(&mut self) {
        self.status = LoopStatus::Stop;
    }

    /// Suspend dispatch; the loop sleeps in 10ms slices until [`resume`].
    ///
    /// [`resume`]: EventLoop::resume
    pub fn pause(&mut self) {
        if self.status == LoopStatus::Running {
            self.status = LoopStatus::Pause;
        }
    }

    /// Resume dispatch after [`pause`].
    ///
    /// [`pause`]: EventLoop::pause
    pub fn resume(&mut self) {
        if self.status == LoopStatus::Pause {
            self.status = LoopStatus::Running;
        }
    }

    // ===== timers =====

    /// Register a timer firing every `timeout_ms` milliseconds, `repeat`
    /// times ([`INFINITE`] for forever). Rejects a zero timeout.
    ///
    /// Timers dispatch on the [`Priority::Highest`] lane.
    ///
    /// [`INFINITE`]: crate::INFINITE
    pub fn add_timer<F>(&mut self, timeout_ms: u64, repeat: u32, cb: F) -> io::Result<TimerId>
    where
        F: FnMut(&mut EventLoop, TimerId) + 'static,
    {
        if timeout_ms == 0 {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        self.update_time();
        let mut entry = TimerEntry::new_timeout(timeout_ms, repeat, Box::new(cb));
        entry.next_fire = self.now_hrtime() + timeout_ms * 1000;
        entry.active = true;
        let deadline = entry.next_fire;
        let key = self.timers.insert(entry);
        self.timer_heap.insert(key, deadline);
        self.ntimers += 1;
        self.nactives += 1;
        trace!("add timer key={} timeout={}ms repeat={}", key, timeout_ms, repeat);
        Ok(TimerId(key))
    }

    /// Register a calendar-periodic timer firing at every wall-clock minute
    /// matching `spec`, `repeat` times ([`INFINITE`] for forever).
    ///
    /// Period timers dispatch on the [`Priority::High`] lane. Fails when the
    /// schedule matches no instant within the next year.
    ///
    /// [`INFINITE`]: crate::INFINITE
    pub fn add_period<F>(&mut self, spec: PeriodSpec, repeat: u32, cb: F) -> io::Result<TimerId>
    where
        F: FnMut(&mut EventLoop, TimerId) + 'static,
    {
        let next = match next_period_usec(&spec) {
            Some(next) => next,
            None => return Err(io::ErrorKind::InvalidInput.into()),
        };
        let mut entry = TimerEntry::new_period(spec, repeat, Box::new(cb));
        entry.next_fire = next;
        entry.active = true;
        let key = self.timers.insert(entry);
        self.timer_heap.insert(key, next);
        self.ntimers += 1;
        self.nactives += 1;
        trace!("add period key={} spec={:?} repeat={}", key, spec, repeat);
        Ok(TimerId(key))
    }

    /// Restart an interval timer: its next firing becomes one full interval
    /// from now. No-op for period timers and for timers already queued for
    /// dispatch in the current tick.
    pub fn reset_timer(&mut self, id: TimerId) {
        let key = id.0;
        let now = self.now_hrtime();
        let deadline = match self.timers.get_mut(key) {
            Some(t) if t.kind == EventKind::Timeout && !t.pending && !t.destroy => {
                t.next_fire = now + t.interval_ms * 1000;
                t.next_fire
            }
            _ => return,
        };
        self.timer_heap.remove(key);
        self.timer_heap.insert(key, deadline);
    }

    /// Delete a timer. Idempotent.
    ///
    /// A timer already queued for dispatch in the current tick still runs
    /// that callback and is released afterwards; otherwise the timer is
    /// released immediately.
    pub fn del_timer(&mut self, id: TimerId) {
        let key = id.0;
        let (was_active, pending) = match self.timers.get_mut(key) {
            Some(t) if !t.destroy => {
                let was_active = t.active;
                t.active = false;
                (was_active, t.pending)
            }
            _ => return,
        };
        if was_active {
            self.ntimers -= 1;
            self.nactives -= 1;
        }
        self.timer_heap.remove(key);
        if pending {
            self.timers.get_mut(key).unwrap().destroy = true;
        } else {
            self.timers.remove(key);
        }
        trace!("del timer key={} pending={}", key, pending);
    }

    // ===== idles =====

    /// Register an idle handler running `repeat` times ([`INFINITE`] for
    /// forever) on ticks with no other pressing work.
    ///
    /// Idles dispatch on the [`Priority::Lowest`] lane and are skipped
    /// entirely on any tick that already produced pending IO or timer
    /// callbacks, so under sustained load they may never run.
    ///
    /// [`INFINITE`]: crate::INFINITE
    pub fn add_idle<F>(&mut self, repeat: u32, cb: F) -> IdleId
    where
        F: FnMut(&mut EventLoop, IdleId) + 'static,
    {
        let mut entry = IdleEntry::new(repeat, Box::new(cb));
        entry.active = true;
        entry.prev = self.idle_tail;
        let key = self.idles.insert(entry);
        match self.idle_tail {
            Some(tail) => self.idles.get_mut(tail).unwrap().next = Some(key),
            None => self.idle_head = Some(key),
        }
        self.idle_tail = Some(key);
        self.nidles += 1;
        self.nactives += 1;
        IdleId(key)
    }

    /// Delete an idle handler. Idempotent; same dispatch rules as
    /// [`del_timer`](EventLoop::del_timer).
    pub fn del_idle(&mut self, id: IdleId) {
        let key = id.0;
        let (was_active, pending) = match self.idles.get_mut(key) {
            Some(i) if !i.destroy => {
                let was_active = i.active;
                i.active = false;
                (was_active, i.pending)
            }
            _ => return,
        };
        if was_active {
            self.nidles -= 1;
            self.nactives -= 1;
            self.unlink_idle(key);
        }
        if pending {
            self.idles.get_mut(key).unwrap().destroy = true;
        } else {
            self.idles.remove(key);
        }
    }

    fn unlink_idle(&mut self, key: usize) {
        let (prev, next) = match self.idles.get(key) {
            Some(i) => (i.prev, i.next),
            None => return,
        };
        match prev {
            Some(p) => self.idles.get_mut(p).unwrap().next = next,
            None => self.idle_head = next,
        }
        match next {
            Some(n) => self.idles.get_mut(n).unwrap().prev = prev,
            None => self.idle_tail = prev,
        }
        let idle = self.idles.get_mut(key).unwrap();
        idle.prev = None;
        idle.next = None;
    }

    // ===== tick =====

    fn process_events(&mut self) {
        let mut blocktime_ms = MAX_BLOCK_TIME_MS;
        self.update_time();
        let mut poll = true;
        if let Some((_, next_deadline)) = self.timer_heap.peek() {
            let now = self.now_hrtime();
            if next_deadline <= now {
                // A timer is already due: skip the poll entirely.
                poll = false;
            } else {
                // +1 so the sleep never underruns the deadline.
                blocktime_ms = ((next_deadline - now) / 1000 + 1).min(MAX_BLOCK_TIME_MS);
            }
        }

        let mut nios = 0;
        if poll {
            let timeout = Duration::from_millis(blocktime_ms);
            if self.nios > 0 {
                nios = self.process_ios(timeout);
            } else {
                thread::sleep(timeout);
            }
            self.update_time();
        }

        let mut ntimers = 0;
        if self.timer_count() > 0 {
            ntimers = self.process_timers();
        }

        let mut nidles = 0;
        if self.npendings == 0 && self.nidles > 0 {
            nidles = self.process_idles();
        }

        let ncbs = self.process_pendings();
        trace!(
            "tick blocktime={}ms nios={} ntimers={} nidles={} nactives={} ncbs={}",
            blocktime_ms, nios, ntimers, nidles, self.nactives, ncbs
        );
    }

    fn process_ios(&mut self, timeout: Duration) -> usize {
        let selector = match self.selector.as_ref() {
            Some(selector) => selector,
            None => {
                thread::sleep(timeout);
                return 0;
            }
        };
        if let Err(e) = selector.select(&mut self.events, Some(timeout)) {
            // Treated as an empty tick; the loop does not self-terminate.
            error!("selector poll error: {}", e);
            return 0;
        }

        let n = self.events.len();
        let mut nevents = 0;
        for i in 0..n {
            let ev = self.events[i];
            let fd = sys::event::fd(&ev);
            let readable = sys::event::is_readable(&ev);
            let writable = sys::event::is_writable(&ev);

            let became_ready = match self.io_mut(fd) {
                Some(io) if io.active => {
                    let mut revents = 0;
                    if readable {
                        revents |= READ_EVENT;
                    }
                    if writable {
                        revents |= WRITE_EVENT;
                    }
                    io.revents |= revents;
                    revents != 0
                }
                _ => false,
            };
            if became_ready {
                self.make_pending(EventRef::Io(fd));
                nevents += 1;
            }
        }
        nevents
    }

    fn process_timers(&mut self) -> usize {
        debug_assert!(self.timer_heap.len() <= self.timers.len());
        let mut ntimers = 0;
        let now = self.now_hrtime();
        while let Some((key, deadline)) = self.timer_heap.peek() {
            if deadline > now {
                break;
            }
            self.timer_heap.pop();

            let timer = match self.timers.get_mut(key) {
                Some(timer) => timer,
                None => continue,
            };
            if timer.repeat != INFINITE && timer.repeat > 0 {
                timer.repeat -= 1;
            }
            if timer.repeat == 0 && timer.active {
                // Final firing: release after its dispatch.
                timer.active = false;
                timer.destroy = true;
                self.ntimers -= 1;
                self.nactives -= 1;
            }

            // Pending before reinsertion, so the timer is queued exactly
            // once per expiry.
            self.make_pending(EventRef::Timer(key));
            ntimers += 1;

            let mut reinsert = None;
            let mut retire = false;
            let timer = self.timers.get_mut(key).unwrap();
            if timer.active {
                match timer.kind {
                    EventKind::Timeout => {
                        timer.next_fire += timer.interval_ms * 1000;
                        reinsert = Some(timer.next_fire);
                    }
                    _ => match timer.period.and_then(|spec| next_period_usec(&spec)) {
                        Some(next) => {
                            timer.next_fire = next;
                            reinsert = Some(next);
                        }
                        // The schedule has no future instant anymore.
                        None => retire = true,
                    },
                }
            }
            if let Some(deadline) = reinsert {
                self.timer_heap.insert(key, deadline);
            }
            if retire {
                let timer = self.timers.get_mut(key).unwrap();
                timer.active = false;
                timer.destroy = true;
                self.ntimers -= 1;
                self.nactives -= 1;
            }
        }
        ntimers
    }

    fn process_idles(&mut self) -> usize {
        let mut nidles = 0;
        let mut cursor = self.idle_head;
        while let Some(key) = cursor {
            let idle = self.idles.get_mut(key).unwrap();
            if idle.repeat != INFINITE && idle.repeat > 0 {
                idle.repeat -= 1;
            }
            if idle.repeat == 0 && idle.active {
                idle.active = false;
                idle.destroy = true;
                self.nidles -= 1;
                self.nactives -= 1;
            }
            self.make_pending(EventRef::Idle(key));
            nidles += 1;
            // Advance before unlinking so list surgery is safe mid-walk.
            let idle = self.idles.get(key).unwrap();
            let next = idle.next;
            let active = idle.active;
            if !active {
                self.unlink_idle(key);
            }
            cursor = next;
        }
        nidles
    }

    pub(crate) fn make_pending(&mut self, ev: EventRef) {
        let priority = match ev {
            EventRef::Timer(key) => match self.timers.get_mut(key) {
                Some(t) if !t.pending => {
                    t.pending = true;
                    t.priority
                }
                _ => return,
            },
            EventRef::Idle(key) => match self.idles.get_mut(key) {
                Some(i) if !i.pending => {
                    i.pending = true;
                    i.priority
                }
                _ => return,
            },
            EventRef::Io(fd) => match self.io_mut(fd) {
                Some(io) if !io.pending => {
                    io.pending = true;
                    io.priority
                }
                _ => return,
            },
        };
        let lane = priority.index();
        let head = self.pendings[lane];
        match ev {
            EventRef::Timer(key) => self.timers.get_mut(key).unwrap().pending_next = head,
            EventRef::Idle(key) => self.idles.get_mut(key).unwrap().pending_next = head,
            EventRef::Io(fd) => self.io_mut(fd).unwrap().pending_next = head,
        }
        self.pendings[lane] = Some(ev);
        self.npendings += 1;
    }

    /// Drain every lane, highest priority first. Within a lane dispatch is
    /// LIFO: the push is a head-insert.
    fn process_pendings(&mut self) -> usize {
        if self.npendings == 0 {
            return 0;
        }
        let mut ncbs = 0;
        for lane in (0..Priority::COUNT).rev() {
            let mut cursor = self.pendings[lane].take();
            while let Some(ev) = cursor {
                cursor = self.dispatch_pending(ev, &mut ncbs);
            }
        }
        self.npendings = 0;
        ncbs
    }

    fn dispatch_pending(&mut self, ev: EventRef, ncbs: &mut usize) -> Option<EventRef> {
        match ev {
            EventRef::Timer(key) => {
                let cb = match self.timers.get_mut(key) {
                    Some(t) if t.pending => t.cb.take(),
                    _ => None,
                };
                if let Some(mut cb) = cb {
                    cb(self, TimerId(key));
                    *ncbs += 1;
                    if let Some(t) = self.timers.get_mut(key) {
                        if t.cb.is_none() {
                            t.cb = Some(cb);
                        }
                    }
                }
                match self.timers.get_mut(key) {
                    Some(t) => {
                        let next = t.pending_next.take();
                        t.pending = false;
                        let destroy = t.destroy;
                        if destroy {
                            self.timer_heap.remove(key);
                            self.timers.remove(key);
                        }
                        next
                    }
                    None => None,
                }
            }
            EventRef::Idle(key) => {
                let cb = match self.idles.get_mut(key) {
                    Some(i) if i.pending => i.cb.take(),
                    _ => None,
                };
                if let Some(mut cb) = cb {
                    cb(self, IdleId(key));
                    *ncbs += 1;
                    if let Some(i) = self.idles.get_mut(key) {
                        if i.cb.is_none() {
                            i.cb = Some(cb);
                        }
                    }
                }
                match self.idles.get_mut(key) {
                    Some(i) => {
                        let next = i.pending_next.take();
                        i.pending = false;
                        let destroy = i.destroy;
                        if destroy {
                            self.idles.remove(key);
                        }
                        next
                    }
                    None => None,
                }
            }
            EventRef::Io(fd) => {
                let run = self.io(fd).map_or(false, |io| io.pending);
                if run {
                    *ncbs += 1;
                    self.io_handle_events(fd);
                }
                match self.io_mut(fd) {
                    Some(io) => {
                        let next = io.pending_next.take();
                        io.pending = false;
                        next
                    }
                    None => None,
                }
            }
        }
    }

    fn cleanup(&mut self) {
        trace!(
            "cleanup: {} timers, {} idles still registered",
            self.timers.len(),
            self.idles.len()
        );
        self.pendings = [None; Priority::COUNT];
        self.npendings = 0;

        self.idles.clear();
        self.idle_head = None;
        self.idle_tail = None;

        self.timer_heap.clear();
        self.timers.clear();

        // Close every non-stdio IO handle; stdio descriptors stay open.
        for idx in 0..self.ios.len() {
            let fd_kind = self.ios[idx].as_ref().map(|io| (io.fd, io.kind));
            if let Some((fd, kind)) = fd_kind {
                if !kind.is_stdio() {
                    self.close(fd);
                }
                self.ios[idx] = None;
            }
        }
        self.ios.clear();

        self.nios = 0;
        self.ntimers = 0;
        self.nidles = 0;
        self.nactives = 0;

        self.selector = None;
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("EventLoop")
            .field("status", &self.status)
            .field("nactives", &self.nactives)
            .field("nios", &self.nios)
            .field("ntimers", &self.ntimers)
            .field("nidles", &self.nidles)
            .field("npendings", &self.npendings)
            .field("loop_cnt", &self.loop_cnt)
            .finish()
    }
}
