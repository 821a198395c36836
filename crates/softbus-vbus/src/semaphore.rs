//! Counting semaphore over shared atomics.
//!
//! The count and the closed flag live in a channel's control block, which
//! may be mapped by several processes, so waiting cannot park on an
//! in-process condition variable. Waiters poll with [`Backoff`] instead:
//! a few spins, then yields, then short sleeps.

use std::{
    hint,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    thread,
    time::{Duration, Instant},
};

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Do not block at all
    Immediate,
    /// Block for at most this long
    Bounded(Duration),
    /// Block until the condition holds or the bus closes
    Forever,
}

impl WaitTimeout {
    /// Map a signed millisecond count: `0` polls, negative waits forever,
    /// positive waits at most that long.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => Self::Immediate,
            ms if ms < 0 => Self::Forever,
            ms => Self::Bounded(Duration::from_millis(ms.unsigned_abs())),
        }
    }

    fn deadline(self) -> Option<Instant> {
        match self {
            Self::Immediate => Some(Instant::now()),
            Self::Bounded(limit) => Some(Instant::now() + limit),
            Self::Forever => None,
        }
    }
}

/// Outcome of a semaphore wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    Ready,
    TimedOut,
    Closed,
}

const SPIN_STEPS: u32 = 6;
const YIELD_STEPS: u32 = 10;
const MAX_SLEEP: Duration = Duration::from_millis(1);

/// Escalating pause for polling loops.
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self { step: 0 }
    }

    pub(crate) fn snooze(&mut self) {
        if self.step < SPIN_STEPS {
            for _ in 0..1u32 << self.step {
                hint::spin_loop();
            }
        } else if self.step < YIELD_STEPS {
            thread::yield_now();
        } else {
            let micros = 50u64 << (self.step - YIELD_STEPS).min(5);
            thread::sleep(Duration::from_micros(micros).min(MAX_SLEEP));
        }
        self.step = self.step.saturating_add(1);
    }
}

/// Counting semaphore with a permit ceiling.
///
/// Releases beyond `max` are ignored, so opportunistic releases can never
/// inflate the count past its initial value. Closing fails every wait.
pub(crate) struct Semaphore<'a> {
    permits: &'a AtomicU64,
    closed: &'a AtomicU32,
    max: u64,
}

impl<'a> Semaphore<'a> {
    pub(crate) fn new(permits: &'a AtomicU64, closed: &'a AtomicU32, max: u64) -> Self {
        Self { permits, closed, max }
    }

    /// Take one permit, waiting according to `timeout`.
    pub(crate) fn acquire(&self, timeout: WaitTimeout) -> Wait {
        self.poll(timeout, || self.try_acquire())
    }

    /// Take one permit if one is available right now.
    pub(crate) fn try_acquire(&self) -> bool {
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Wait until a permit is available without taking it.
    pub(crate) fn wait_available(&self, timeout: WaitTimeout) -> Wait {
        self.poll(timeout, || self.available() > 0)
    }

    /// Return one permit. Returns `false` if already at the ceiling.
    pub(crate) fn release(&self) -> bool {
        let max = self.max;
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    pub(crate) fn available(&self) -> usize {
        usize::try_from(self.permits.load(Ordering::Acquire)).unwrap_or(usize::MAX)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) != 0
    }

    /// Retry `ready` until it holds, the semaphore closes, or the deadline
    /// passes. Checked at least once.
    fn poll(&self, timeout: WaitTimeout, ready: impl Fn() -> bool) -> Wait {
        let deadline = timeout.deadline();
        let mut backoff = Backoff::new();
        loop {
            if self.is_closed() {
                return Wait::Closed;
            }
            if ready() {
                return Wait::Ready;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Wait::TimedOut;
            }
            backoff.snooze();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    struct Cell {
        permits: AtomicU64,
        closed: AtomicU32,
    }

    impl Cell {
        fn new(initial: u64) -> Arc<Self> {
            Arc::new(Self { permits: AtomicU64::new(initial), closed: AtomicU32::new(0) })
        }

        fn sem(&self, max: u64) -> Semaphore<'_> {
            Semaphore::new(&self.permits, &self.closed, max)
        }
    }

    #[test]
    fn timeout_from_millis() {
        assert_eq!(WaitTimeout::from_millis(0), WaitTimeout::Immediate);
        assert_eq!(WaitTimeout::from_millis(-1), WaitTimeout::Forever);
        assert_eq!(WaitTimeout::from_millis(250), WaitTimeout::Bounded(Duration::from_millis(250)));
    }

    #[test]
    fn release_is_capped() {
        let cell = Cell::new(2);
        let sem = cell.sem(2);
        assert!(!sem.release());
        assert!(sem.try_acquire());
        assert!(sem.release());
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn empty_semaphore_refuses_immediately() {
        let cell = Cell::new(0);
        assert!(!cell.sem(1).try_acquire());
        assert_eq!(cell.sem(1).acquire(WaitTimeout::Immediate), Wait::TimedOut);
    }

    #[test]
    fn bounded_wait_times_out() {
        let cell = Cell::new(0);
        let start = Instant::now();
        assert_eq!(cell.sem(1).acquire(WaitTimeout::Bounded(Duration::from_millis(30))), Wait::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn release_wakes_blocked_acquirer() {
        let cell = Cell::new(0);
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.sem(1).acquire(WaitTimeout::Forever))
        };

        thread::sleep(Duration::from_millis(20));
        cell.sem(1).release();
        assert_eq!(waiter.join().unwrap(), Wait::Ready);
        assert_eq!(cell.sem(1).available(), 0);
    }

    #[test]
    fn close_wakes_forever_waiters() {
        let cell = Cell::new(0);
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.sem(1).wait_available(WaitTimeout::Forever))
        };

        thread::sleep(Duration::from_millis(20));
        cell.closed.store(1, Ordering::Release);
        assert_eq!(waiter.join().unwrap(), Wait::Closed);
    }

    #[test]
    fn wait_available_does_not_consume() {
        let cell = Cell::new(1);
        assert_eq!(cell.sem(1).wait_available(WaitTimeout::Immediate), Wait::Ready);
        assert_eq!(cell.sem(1).available(), 1);
    }

    #[test]
    fn concurrent_acquires_never_oversubscribe() {
        let cell = Cell::new(100);
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || (0..50).filter(|_| cell.sem(100).try_acquire()).count())
            })
            .collect();

        let taken: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(taken, 100);
        assert_eq!(cell.sem(100).available(), 0);
    }
}
