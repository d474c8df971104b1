//! Integration tests for worker pool scheduling, back-pressure and
//! shutdown behavior.

use refract::error::Error;
use refract::worker::{RejectPolicy, SubmitOptions, TaskPriority, WorkerPool};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Submit a task that occupies one worker until `gate` flips.
fn block_worker(
    pool: &WorkerPool,
    gate: &Arc<AtomicBool>,
) -> refract::worker::TaskHandle<()> {
    let gate = Arc::clone(gate);
    let handle = pool
        .submit(move || {
            while !gate.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();
    while pool.status().active == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    handle
}

#[test]
fn test_priority_scheduling_order() {
    // One worker: a slow normal task blocks it, then low, urgent and
    // high tasks queue up. Execution order must be urgent, high, low.
    let pool = WorkerPool::new(1, 16, RejectPolicy::Block);
    let gate = Arc::new(AtomicBool::new(false));
    let order = Arc::new(Mutex::new(Vec::new()));

    let blocker = block_worker(&pool, &gate);

    let mut handles = Vec::new();
    for (tag, priority) in [
        ("t1-low", TaskPriority::Low),
        ("t2-urgent", TaskPriority::Urgent),
        ("t3-high", TaskPriority::High),
    ] {
        let order = Arc::clone(&order);
        handles.push(
            pool.submit_with(
                move || {
                    order.lock().unwrap().push(tag);
                    Ok(())
                },
                SubmitOptions::default().priority(priority).name(tag),
            )
            .unwrap(),
        );
    }

    gate.store(true, Ordering::Release);
    blocker.wait().unwrap();
    for handle in handles {
        handle.wait().unwrap();
    }

    assert_eq!(&*order.lock().unwrap(), &["t2-urgent", "t3-high", "t1-low"]);
}

#[test]
fn test_fifo_within_priority_class() {
    let pool = WorkerPool::new(1, 64, RejectPolicy::Block);
    let gate = Arc::new(AtomicBool::new(false));
    let order = Arc::new(Mutex::new(Vec::new()));

    let blocker = block_worker(&pool, &gate);

    let mut handles = Vec::new();
    for i in 0..16u32 {
        let order = Arc::clone(&order);
        handles.push(
            pool.submit_with(
                move || {
                    order.lock().unwrap().push(i);
                    Ok(())
                },
                SubmitOptions::default().priority(TaskPriority::High),
            )
            .unwrap(),
        );
    }

    gate.store(true, Ordering::Release);
    blocker.wait().unwrap();
    for handle in handles {
        handle.wait().unwrap();
    }

    let seen = order.lock().unwrap();
    assert_eq!(&*seen, &(0..16).collect::<Vec<u32>>());
}

#[test]
fn test_graceful_shutdown_reaches_all_accepted_tasks() {
    let pool = WorkerPool::new(4, 128, RejectPolicy::Block);
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..64 {
        let completed = Arc::clone(&completed);
        handles.push(
            pool.submit(move || {
                thread::sleep(Duration::from_millis(1));
                completed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .unwrap(),
        );
    }

    pool.shutdown_graceful();

    assert_eq!(completed.load(Ordering::Relaxed), 64);
    for handle in handles {
        assert!(handle.is_done());
    }
    // Submissions after shutdown are rejected.
    assert!(matches!(pool.submit(|| Ok(())), Err(Error::Shutdown)));
}

#[test]
fn test_block_policy_waits_for_space() {
    let pool = WorkerPool::new(1, 1, RejectPolicy::Block);
    let gate = Arc::new(AtomicBool::new(false));

    let blocker = block_worker(&pool, &gate);
    let _queued = pool.submit(|| Ok(())).unwrap();

    // The queue is full; this submission blocks until the worker frees
    // it. Open the gate from another thread shortly after.
    let opener = {
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            gate.store(true, Ordering::Release);
        })
    };

    let handle = pool.submit(|| Ok(7)).unwrap();
    assert_eq!(handle.wait().unwrap(), 7);

    opener.join().unwrap();
    blocker.wait().unwrap();
}

#[test]
fn test_stats_snapshot_across_threads() {
    let pool = Arc::new(WorkerPool::new(4, 256, RejectPolicy::Block));

    let mut submitters = Vec::new();
    for _ in 0..4 {
        let pool = Arc::clone(&pool);
        submitters.push(thread::spawn(move || {
            for i in 0..25u32 {
                pool.submit_with(
                    move || {
                        if i % 5 == 0 {
                            Err(Error::InvalidInput("every fifth fails".into()))
                        } else {
                            Ok(())
                        }
                    },
                    SubmitOptions::default().name("mixed"),
                )
                .unwrap();
            }
        }));
    }
    for t in submitters {
        t.join().unwrap();
    }
    pool.wait_all();

    let stats = pool.stats();
    assert_eq!(stats["mixed"].submitted, 100);
    assert_eq!(stats["mixed"].failed, 20);
    assert_eq!(stats["mixed"].completed, 80);
}

#[test]
fn test_wait_all_for_observes_completion() {
    let pool = WorkerPool::new(2, 32, RejectPolicy::Block);
    for _ in 0..8 {
        pool.submit(|| {
            thread::sleep(Duration::from_millis(5));
            Ok(())
        })
        .unwrap();
    }
    assert!(pool.wait_all_for(Duration::from_secs(10)));
    assert_eq!(pool.status().queued, 0);
}
