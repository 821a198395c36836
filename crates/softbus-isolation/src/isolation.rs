//! Single-role task executor.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped --start()--> Running --stop()--> Stopped
//! ```
//!
//! While running, [`ThreadIsolation::post_task`] appends to the queue and the
//! worker pops tasks one at a time in submission order. A task that panics is
//! logged and discarded; the worker keeps going. `stop()` discards whatever is
//! still queued.

use std::{
    any::Any,
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle, ThreadId},
};

use crate::{IsolationError, lock};

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Logical execution context a worker is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Camera-owning side
    Source,
    /// Consuming side
    Sink,
}

impl Role {
    /// Name given to the role's worker thread.
    pub fn thread_name(self) -> &'static str {
        match self {
            Self::Source => "softbus-source",
            Self::Sink => "softbus-sink",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "SOURCE"),
            Self::Sink => write!(f, "SINK"),
        }
    }
}

struct State {
    queue: VecDeque<Task>,
    pending: usize,
    completed: bool,
    running: bool,
    /// Bumped on every start so a detached worker from an earlier run exits
    generation: u64,
    worker: Option<ThreadId>,
}

struct Shared {
    role: Role,
    state: Mutex<State>,
    /// Signalled when a task is queued or the executor stops
    work: Condvar,
    /// Signalled when the pending count reaches zero or the executor stops
    idle: Condvar,
}

impl Shared {
    fn wait<'a>(cv: &Condvar, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// One worker thread plus its task queue.
pub struct ThreadIsolation {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ThreadIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadIsolation")
            .field("role", &self.shared.role)
            .field("running", &self.is_running())
            .field("pending", &self.pending_tasks())
            .finish_non_exhaustive()
    }
}

impl ThreadIsolation {
    /// Stopped executor for `role`.
    pub fn new(role: Role) -> Self {
        Self {
            shared: Arc::new(Shared {
                role,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    pending: 0,
                    completed: true,
                    running: false,
                    generation: 0,
                    worker: None,
                }),
                work: Condvar::new(),
                idle: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Role this executor runs.
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// - `IsolationError::AlreadyRunning` if the worker is alive
    /// - `IsolationError::Spawn` if the OS refuses a new thread
    pub fn start(&self) -> Result<(), IsolationError> {
        let role = self.shared.role;
        let mut handle = lock(&self.handle);

        // Held across the spawn so the worker cannot observe a half-set state.
        let mut state = lock(&self.shared.state);
        if state.running {
            tracing::error!(%role, "Thread already running");
            return Err(IsolationError::AlreadyRunning(role));
        }

        state.running = true;
        state.generation += 1;
        state.completed = state.pending == 0;
        let generation = state.generation;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(role.thread_name().to_owned())
            .spawn(move || worker_loop(&shared, generation));

        match spawned {
            Ok(join) => {
                state.worker = Some(join.thread().id());
                *handle = Some(join);
                tracing::info!(%role, "Started thread isolation");
                Ok(())
            },
            Err(e) => {
                state.running = false;
                tracing::error!(%role, error = %e, "Failed to spawn worker");
                Err(IsolationError::Spawn(e))
            },
        }
    }

    /// Stop the worker and discard queued tasks. Idempotent.
    ///
    /// Joins the worker unless called from the worker itself, in which case
    /// the worker exits once the current task returns.
    pub fn stop(&self) {
        let discarded = {
            let mut state = lock(&self.shared.state);
            if !state.running {
                return;
            }
            state.running = false;
            let discarded = state.queue.len();
            state.queue.clear();
            state.pending = 0;
            discarded
        };
        self.shared.work.notify_all();
        self.shared.idle.notify_all();

        let join = lock(&self.handle).take();
        if let Some(join) = join {
            if join.thread().id() == thread::current().id() {
                tracing::debug!(role = %self.shared.role, "Stop requested from worker; not joining");
            } else if join.join().is_err() {
                tracing::error!(role = %self.shared.role, "Worker thread panicked");
            }
        }

        lock(&self.shared.state).worker = None;
        tracing::info!(role = %self.shared.role, discarded, "Stopped thread isolation");
    }

    /// Queue `task` for the worker.
    ///
    /// Returns false (and logs) if the executor is not running; the task is
    /// dropped without running.
    pub fn post_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = lock(&self.shared.state);
            if !state.running {
                tracing::error!(role = %self.shared.role, "Cannot post task, thread not running");
                return false;
            }
            state.queue.push_back(Box::new(task));
            state.pending += 1;
            state.completed = false;
        }
        self.shared.work.notify_one();
        true
    }

    /// Block until every posted task has run or the executor stops.
    ///
    /// Returns immediately when nothing is pending. Called from the worker
    /// itself it also returns immediately, since waiting would deadlock.
    pub fn wait_for_tasks_completion(&self) {
        if self.is_in_correct_thread() {
            tracing::warn!(role = %self.shared.role, "wait_for_tasks_completion called from worker");
            return;
        }

        let mut state = lock(&self.shared.state);
        while !state.completed && state.running {
            state = Shared::wait(&self.shared.idle, state);
        }
    }

    /// Returns true if the caller is this executor's worker thread.
    pub fn is_in_correct_thread(&self) -> bool {
        lock(&self.shared.state).worker == Some(thread::current().id())
    }

    /// Tasks posted but not yet finished.
    pub fn pending_tasks(&self) -> usize {
        lock(&self.shared.state).pending
    }

    /// Returns true between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }
}

impl Drop for ThreadIsolation {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared, generation: u64) {
    let role = shared.role;
    tracing::debug!(%role, "Worker loop started");

    loop {
        let task = {
            let mut state = lock(&shared.state);
            loop {
                if !state.running || state.generation != generation {
                    tracing::debug!(%role, "Worker loop exiting");
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                state = Shared::wait(&shared.work, state);
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            tracing::error!(%role, panic = panic_message(payload.as_ref()), "Task panicked");
        }

        let mut state = lock(&shared.state);
        if state.generation != generation {
            continue;
        }
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            state.completed = true;
            shared.idle.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        time::Duration,
    };

    use super::*;

    #[test]
    fn start_twice_fails() {
        let exec = ThreadIsolation::new(Role::Source);
        exec.start().unwrap();
        assert!(matches!(exec.start(), Err(IsolationError::AlreadyRunning(Role::Source))));
        exec.stop();
        assert!(!exec.is_running());
    }

    #[test]
    fn post_before_start_is_dropped() {
        let exec = ThreadIsolation::new(Role::Sink);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        assert!(!exec.post_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(exec.pending_tasks(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tasks_run_in_order_on_named_worker() {
        let exec = ThreadIsolation::new(Role::Sink);
        exec.start().unwrap();

        let (tx, rx) = mpsc::channel();
        for i in 0..32 {
            let tx = tx.clone();
            exec.post_task(move || {
                let name = thread::current().name().map(str::to_owned);
                tx.send((i, name)).unwrap();
            });
        }
        exec.wait_for_tasks_completion();
        drop(tx);

        let seen: Vec<_> = rx.iter().collect();
        assert_eq!(seen.len(), 32);
        for (expected, (i, name)) in seen.into_iter().enumerate() {
            assert_eq!(i, expected);
            assert_eq!(name.as_deref(), Some("softbus-sink"));
        }
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let exec = ThreadIsolation::new(Role::Source);
        exec.start().unwrap();

        exec.post_task(|| panic!("task failure"));
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        exec.post_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        exec.wait_for_tasks_completion();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(exec.is_running());
        assert_eq!(exec.pending_tasks(), 0);
    }

    #[test]
    fn correct_thread_only_inside_tasks() {
        let exec = Arc::new(ThreadIsolation::new(Role::Source));
        exec.start().unwrap();
        assert!(!exec.is_in_correct_thread());

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&exec);
        exec.post_task(move || tx.send(inner.is_in_correct_thread()).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        exec.stop();
    }

    #[test]
    fn wait_returns_immediately_when_idle() {
        let exec = ThreadIsolation::new(Role::Sink);
        exec.start().unwrap();
        exec.wait_for_tasks_completion();

        // Stopped executors never block waiters either.
        exec.stop();
        exec.wait_for_tasks_completion();
    }

    #[test]
    fn stop_discards_queued_tasks() {
        let exec = Arc::new(ThreadIsolation::new(Role::Source));
        exec.start().unwrap();

        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        exec.post_task(move || {
            started_tx.send(()).unwrap();
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = Arc::clone(&ran);
            exec.post_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(exec.pending_tasks(), 5);

        // Release the blocking task only once the queue has been discarded.
        let stopper = {
            let exec = Arc::clone(&exec);
            thread::spawn(move || exec.stop())
        };
        while exec.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        gate_tx.send(()).unwrap();
        stopper.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(exec.pending_tasks(), 0);
    }

    #[test]
    fn stop_from_worker_does_not_deadlock() {
        let exec = Arc::new(ThreadIsolation::new(Role::Sink));
        exec.start().unwrap();

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&exec);
        exec.post_task(move || {
            inner.stop();
            tx.send(inner.is_running()).unwrap();
        });
        assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!exec.is_running());

        // Restart after a self-stop gets a fresh worker.
        exec.start().unwrap();
        let (tx, rx) = mpsc::channel();
        exec.post_task(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn restart_after_stop() {
        let exec = ThreadIsolation::new(Role::Source);
        for _ in 0..3 {
            exec.start().unwrap();
            let (tx, rx) = mpsc::channel();
            exec.post_task(move || tx.send(()).unwrap());
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
            exec.stop();
        }
    }
}
