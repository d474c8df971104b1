//! Metrics collection using the `metrics` facade.
//!
//! Refract exposes the following metrics:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `refract_graphs_built` | Counter | Filter graphs constructed |
//! | `refract_graphs_evicted` | Counter | Graphs evicted to make room |
//! | `refract_graphs_swept` | Counter | Graphs removed by expiry sweeps |
//! | `refract_lease_hits` | Counter | Leases served from the cache |
//! | `refract_pool_entries` | Gauge | Graphs currently cached |
//! | `refract_filter_time_ns` | Histogram | Time to filter one frame |
//! | `refract_tasks_submitted` | Counter | Tasks accepted by the worker pool |
//! | `refract_tasks_completed` | Counter | Tasks that finished successfully |
//! | `refract_tasks_failed` | Counter | Tasks that errored or panicked |
//! | `refract_queue_depth` | Gauge | Tasks waiting in the queue |
//!
//! The library only records; install a `metrics` exporter (prometheus,
//! statsd, ...) to collect them.

use metrics::{Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether metric descriptions have been registered.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const GRAPHS_BUILT: &str = "refract_graphs_built";
const GRAPHS_EVICTED: &str = "refract_graphs_evicted";
const GRAPHS_SWEPT: &str = "refract_graphs_swept";
const LEASE_HITS: &str = "refract_lease_hits";
const POOL_ENTRIES: &str = "refract_pool_entries";
const FILTER_TIME_NS: &str = "refract_filter_time_ns";
const TASKS_SUBMITTED: &str = "refract_tasks_submitted";
const TASKS_COMPLETED: &str = "refract_tasks_completed";
const TASKS_FAILED: &str = "refract_tasks_failed";
const QUEUE_DEPTH: &str = "refract_queue_depth";

/// Register metric descriptions.
///
/// Call once at application startup. Safe to call multiple times
/// (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(GRAPHS_BUILT, Unit::Count, "Filter graphs constructed");
    metrics::describe_counter!(GRAPHS_EVICTED, Unit::Count, "Graphs evicted to make room");
    metrics::describe_counter!(GRAPHS_SWEPT, Unit::Count, "Graphs removed by expiry sweeps");
    metrics::describe_counter!(LEASE_HITS, Unit::Count, "Leases served from the cache");
    metrics::describe_gauge!(POOL_ENTRIES, Unit::Count, "Graphs currently cached");
    metrics::describe_histogram!(FILTER_TIME_NS, Unit::Nanoseconds, "Time to filter one frame");
    metrics::describe_counter!(
        TASKS_SUBMITTED,
        Unit::Count,
        "Tasks accepted by the worker pool"
    );
    metrics::describe_counter!(
        TASKS_COMPLETED,
        Unit::Count,
        "Tasks that finished successfully"
    );
    metrics::describe_counter!(TASKS_FAILED, Unit::Count, "Tasks that errored or panicked");
    metrics::describe_gauge!(QUEUE_DEPTH, Unit::Count, "Tasks waiting in the queue");
}

/// Record a filter graph construction.
#[inline]
pub fn record_graph_built() {
    counter!(GRAPHS_BUILT).increment(1);
}

/// Record a graph evicted to make room.
#[inline]
pub fn record_graph_evicted() {
    counter!(GRAPHS_EVICTED).increment(1);
}

/// Record graphs removed by an expiry sweep.
#[inline]
pub fn record_graphs_swept(count: usize) {
    counter!(GRAPHS_SWEPT).increment(count as u64);
}

/// Record a lease served from the cache.
#[inline]
pub fn record_lease_hit() {
    counter!(LEASE_HITS).increment(1);
}

/// Record the current number of cached graphs.
#[inline]
pub fn record_pool_entries(count: usize) {
    gauge!(POOL_ENTRIES).set(count as f64);
}

/// Record the time spent filtering one frame.
#[inline]
pub fn record_filter_time(duration: Duration) {
    histogram!(FILTER_TIME_NS).record(duration.as_nanos() as f64);
}

/// Record a task accepted by the worker pool.
#[inline]
pub fn record_task_submitted() {
    counter!(TASKS_SUBMITTED).increment(1);
}

/// Record a task that finished successfully.
#[inline]
pub fn record_task_completed() {
    counter!(TASKS_COMPLETED).increment(1);
}

/// Record a task that errored or panicked.
#[inline]
pub fn record_task_failed() {
    counter!(TASKS_FAILED).increment(1);
}

/// Record the current queue depth.
#[inline]
pub fn record_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}
