//! Bounded priority-scheduled worker pool.
//!
//! A fixed set of OS threads executes type-erased tasks in strict
//! priority order (FIFO within a priority class). The queue is bounded;
//! a configurable [`RejectPolicy`] decides what happens when it fills.
//! Task failures (errors and panics) are isolated into the task's
//! [`TaskHandle`] and per-name statistics; workers never die on user
//! errors.
//!
//! # Example
//!
//! ```rust
//! use refract::worker::{RejectPolicy, SubmitOptions, TaskPriority, WorkerPool};
//!
//! let pool = WorkerPool::new(2, 100, RejectPolicy::Block);
//!
//! let handle = pool
//!     .submit_with(
//!         || Ok(21 * 2),
//!         SubmitOptions::default()
//!             .priority(TaskPriority::High)
//!             .name("answer"),
//!     )
//!     .unwrap();
//!
//! assert_eq!(handle.wait().unwrap(), 42);
//! pool.shutdown_graceful();
//! ```

use crate::error::{Error, Result};
use crate::observability;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name used for tasks submitted without one.
pub const DEFAULT_TASK_NAME: &str = "anonymous";

/// Task scheduling priority. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TaskPriority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Ahead of normal work.
    High,
    /// Ahead of everything.
    Urgent,
}

/// What to do when a task is submitted to a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectPolicy {
    /// Fail the submission synchronously with `QueueFull`.
    Throw,
    /// Block until space is available (optionally bounded by the
    /// submission timeout).
    #[default]
    Block,
    /// Complete the task's handle immediately with a discard error;
    /// nothing is enqueued.
    Discard,
}

/// Options for [`WorkerPool::submit_with`].
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    priority: TaskPriority,
    name: Option<String>,
    timeout: Option<Duration>,
}

impl SubmitOptions {
    /// Set the scheduling priority (default `Normal`).
    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the statistics name (default `"anonymous"`).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bound the time a `Block` submission may wait for queue space.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Per-name task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Tasks accepted (or discarded) under this name.
    pub submitted: u64,
    /// Tasks that ran to a successful result.
    pub completed: u64,
    /// Tasks that returned an error or panicked.
    pub failed: u64,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks currently executing.
    pub active: usize,
    /// Worker thread count.
    pub threads: usize,
    /// Queue capacity.
    pub max_queue: usize,
}

// ============================================================================
// TaskHandle - one-shot result slot
// ============================================================================

struct HandleShared<T> {
    slot: Mutex<Option<Result<T>>>,
    done: Condvar,
}

/// Handle to await one submitted task's result.
///
/// The result is either the task's own `Ok`/`Err`, or a pool-level
/// rejection (`TaskDiscarded`, `Shutdown`) for tasks that never ran.
pub struct TaskHandle<T> {
    shared: Arc<HandleShared<T>>,
}

impl<T> TaskHandle<T> {
    fn new() -> (Self, Arc<HandleShared<T>>) {
        let shared = Arc::new(HandleShared {
            slot: Mutex::new(None),
            done: Condvar::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            shared,
        )
    }

    /// Whether the task has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.shared.slot.lock().unwrap().is_some()
    }

    /// Block until the task completes and take its result.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.slot.lock().unwrap();
        while slot.is_none() {
            slot = self.shared.done.wait(slot).unwrap();
        }
        slot.take().expect("slot filled")
    }

    /// Block up to `timeout` for the result. Returns `None` on
    /// timeout; the task keeps running and its result is dropped.
    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock().unwrap();
        while slot.is_none() {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, result) = self.shared.done.wait_timeout(slot, remaining).unwrap();
            slot = guard;
            if result.timed_out() && slot.is_none() {
                return None;
            }
        }
        Some(slot.take().expect("slot filled"))
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

fn complete<T>(shared: &HandleShared<T>, result: Result<T>) {
    let mut slot = shared.slot.lock().unwrap();
    *slot = Some(result);
    shared.done.notify_all();
}

// ============================================================================
// Task wrapper
// ============================================================================

/// A queued task: type-erased run/abort closures plus scheduling keys.
/// Priority and submission sequence are immutable after enqueue.
struct TaskWrapper {
    name: String,
    priority: TaskPriority,
    /// Monotonic submission sequence; the FIFO key within a priority.
    seq: u64,
    /// Runs the task; returns true if it failed.
    run: Box<dyn FnOnce() -> bool + Send>,
    /// Completes the handle with a shutdown error without running.
    abort: Box<dyn FnOnce() + Send>,
}

impl PartialEq for TaskWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for TaskWrapper {}

impl PartialOrd for TaskWrapper {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskWrapper {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority wins, then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ============================================================================
// WorkerPool
// ============================================================================

struct PoolState {
    queue: BinaryHeap<TaskWrapper>,
    max_queue: usize,
    active: usize,
    next_seq: u64,
    /// Rejects new submissions while a graceful shutdown drains.
    draining: bool,
    reject_policy: RejectPolicy,
    stats: HashMap<String, TaskStats>,
    threads: usize,
}

struct PoolInner {
    state: Mutex<PoolState>,
    task_available: Condvar,
    queue_not_full: Condvar,
    all_done: Condvar,
    stop: AtomicBool,
}

/// Bounded executor with priority scheduling, back-pressure,
/// statistics and two shutdown modes.
///
/// See the [module documentation](self) for an overview.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with `threads` workers and a queue bounded at
    /// `max_queue` tasks.
    pub fn new(threads: usize, max_queue: usize, reject_policy: RejectPolicy) -> Self {
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                max_queue,
                active: 0,
                next_seq: 0,
                draining: false,
                reject_policy,
                stats: HashMap::new(),
                threads,
            }),
            task_available: Condvar::new(),
            queue_not_full: Condvar::new(),
            all_done: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let pool = Self {
            inner,
            workers: Mutex::new(Vec::new()),
        };
        pool.spawn_workers(threads);
        debug!(threads, max_queue, "worker pool started");
        pool
    }

    /// Create a pool sized to the machine's available parallelism,
    /// with a 1000-task queue and the `Block` reject policy.
    pub fn with_default_size() -> Self {
        Self::new(default_threads(), 1000, RejectPolicy::Block)
    }

    fn spawn_workers(&self, threads: usize) {
        let mut workers = self.workers.lock().unwrap();
        for index in 0..threads {
            let inner = Arc::clone(&self.inner);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("refract-worker-{index}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn worker thread"),
            );
        }
    }

    /// Submit a task at normal priority under the default name.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.submit_with(task, SubmitOptions::default())
    }

    /// Submit a task with explicit priority, name and submission
    /// timeout.
    ///
    /// The returned handle resolves to the task's result, or to a
    /// rejection error if the task was discarded or the pool shut down
    /// before it ran. Fails synchronously with `Shutdown`, `QueueFull`
    /// or `SubmitTimeout` depending on pool state and reject policy.
    pub fn submit_with<T, F>(&self, task: F, opts: SubmitOptions) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let name = opts.name.unwrap_or_else(|| DEFAULT_TASK_NAME.to_string());
        let (handle, shared) = TaskHandle::<T>::new();

        let mut state = self.inner.state.lock().unwrap();
        if self.inner.stop.load(Ordering::Acquire) || state.draining {
            return Err(Error::Shutdown);
        }

        if state.queue.len() >= state.max_queue {
            match state.reject_policy {
                RejectPolicy::Throw => {
                    warn!(task = %name, "queue full, rejecting submission");
                    return Err(Error::QueueFull);
                }
                RejectPolicy::Block => {
                    let deadline = opts.timeout.map(|t| Instant::now() + t);
                    while state.queue.len() >= state.max_queue {
                        if self.inner.stop.load(Ordering::Acquire) || state.draining {
                            return Err(Error::Shutdown);
                        }
                        state = match deadline {
                            Some(deadline) => {
                                let Some(remaining) =
                                    deadline.checked_duration_since(Instant::now())
                                else {
                                    return Err(Error::SubmitTimeout);
                                };
                                let (guard, result) = self
                                    .inner
                                    .queue_not_full
                                    .wait_timeout(state, remaining)
                                    .unwrap();
                                if result.timed_out()
                                    && guard.queue.len() >= guard.max_queue
                                {
                                    return Err(Error::SubmitTimeout);
                                }
                                guard
                            }
                            None => self.inner.queue_not_full.wait(state).unwrap(),
                        };
                    }
                    if self.inner.stop.load(Ordering::Acquire) || state.draining {
                        return Err(Error::Shutdown);
                    }
                }
                RejectPolicy::Discard => {
                    // Discards keep submit-order accounting under a
                    // derived name.
                    let derived = format!("{name}_discarded");
                    state.stats.entry(derived).or_default().submitted += 1;
                    drop(state);
                    complete(&shared, Err(Error::TaskDiscarded));
                    return Ok(handle);
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;

        let run_shared = Arc::clone(&shared);
        let run = Box::new(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(task)) {
                Ok(result) => result,
                Err(panic) => Err(Error::TaskPanicked(panic_message(&panic))),
            };
            let failed = outcome.is_err();
            complete(&run_shared, outcome);
            failed
        });
        let abort = Box::new(move || complete(&shared, Err(Error::Shutdown)));

        state.queue.push(TaskWrapper {
            name: name.clone(),
            priority: opts.priority,
            seq,
            run,
            abort,
        });
        state.stats.entry(name).or_default().submitted += 1;
        observability::record_task_submitted();
        observability::record_queue_depth(state.queue.len());
        drop(state);

        self.inner.task_available.notify_one();
        Ok(handle)
    }

    /// Change the reject policy for subsequent submissions.
    pub fn set_reject_policy(&self, policy: RejectPolicy) {
        self.inner.state.lock().unwrap().reject_policy = policy;
    }

    /// Block until the queue is empty and no task is executing.
    pub fn wait_all(&self) {
        let mut state = self.inner.state.lock().unwrap();
        while !(state.queue.is_empty() && state.active == 0) {
            state = self.inner.all_done.wait(state).unwrap();
        }
    }

    /// Bounded [`wait_all`](Self::wait_all). Returns whether the
    /// all-done condition was observed before the deadline.
    pub fn wait_all_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().unwrap();
        while !(state.queue.is_empty() && state.active == 0) {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, result) = self.inner.all_done.wait_timeout(state, remaining).unwrap();
            state = guard;
            if result.timed_out() && !(state.queue.is_empty() && state.active == 0) {
                return false;
            }
        }
        true
    }

    /// Stop immediately. Wakes all workers and blocked submitters and
    /// joins the workers; queued-but-unstarted tasks are abandoned
    /// (their handles complete with a shutdown error).
    pub fn shutdown(&self) {
        let abandoned = {
            let mut state = self.inner.state.lock().unwrap();
            if self.inner.stop.swap(true, Ordering::AcqRel) {
                return;
            }
            state.queue.drain().collect::<Vec<_>>()
        };

        self.inner.task_available.notify_all();
        self.inner.queue_not_full.notify_all();
        self.inner.all_done.notify_all();

        for task in abandoned {
            (task.abort)();
        }

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
        info!("worker pool shut down");
    }

    /// Graceful shutdown: reject new submissions, wait for the queue
    /// to drain and active tasks to finish, then stop the workers.
    pub fn shutdown_graceful(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if self.inner.stop.load(Ordering::Acquire) || state.draining {
                return;
            }
            state.draining = true;
        }

        self.wait_all();
        self.shutdown();
        info!("worker pool drained and shut down");
    }

    /// Tear down the pool and restart it with `threads` workers. Any
    /// queued tasks are abandoned as in [`shutdown`](Self::shutdown).
    pub fn restart(&mut self, threads: usize) {
        self.shutdown();

        {
            let mut state = self.inner.state.lock().unwrap();
            state.queue.clear();
            state.active = 0;
            state.draining = false;
            state.threads = threads;
            self.inner.stop.store(false, Ordering::Release);
        }

        self.spawn_workers(threads);
        info!(threads, "worker pool restarted");
    }

    /// Snapshot the per-name task statistics.
    pub fn stats(&self) -> HashMap<String, TaskStats> {
        self.inner.state.lock().unwrap().stats.clone()
    }

    /// Snapshot queue depth, active count and sizing.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock().unwrap();
        PoolStatus {
            queued: state.queue.len(),
            active: state.active,
            threads: state.threads,
            max_queue: state.max_queue,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("WorkerPool")
            .field("queued", &status.queued)
            .field("active", &status.active)
            .field("threads", &status.threads)
            .finish()
    }
}

/// The machine's available parallelism, falling back to one.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut state = inner.state.lock().unwrap();
            loop {
                if inner.stop.load(Ordering::Acquire) {
                    return;
                }
                if state.queue.peek().is_some() {
                    break;
                }
                state = inner.task_available.wait(state).unwrap();
            }
            let task = state.queue.pop().expect("peeked task present");
            state.active += 1;
            observability::record_queue_depth(state.queue.len());
            drop(state);
            inner.queue_not_full.notify_one();
            task
        };

        let name = task.name;
        let failed = (task.run)();

        let mut state = inner.state.lock().unwrap();
        let entry = state.stats.entry(name).or_default();
        if failed {
            entry.failed += 1;
            observability::record_task_failed();
        } else {
            entry.completed += 1;
            observability::record_task_completed();
        }
        state.active -= 1;
        if state.queue.is_empty() && state.active == 0 {
            inner.all_done.notify_all();
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(nested) = panic.downcast_ref::<Box<dyn std::any::Any + Send>>() {
        return panic_message(nested.as_ref());
    }
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
