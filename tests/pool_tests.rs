//! Integration tests for the graph pool's sharing, contention,
//! eviction and expiry behavior.

use refract::frame::{Frame, PixelFormat};
use refract::pool::GraphPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn frame(width: u32, height: u32, format: PixelFormat) -> Frame {
    Frame::new(width, height, format).unwrap()
}

#[test]
fn test_hit_path_returns_same_graph() {
    let pool = GraphPool::new(2, Duration::from_secs(60));
    let f = frame(1920, 1080, PixelFormat::I420);

    let first_id = {
        let lease = pool.lease(&f, "null", false).expect("first lease");
        assert_eq!(lease.use_count(), 1);
        lease.graph_id()
    };

    let lease = pool.lease(&f, "null", false).expect("second lease");
    assert_eq!(lease.graph_id(), first_id);
    assert_eq!(lease.use_count(), 2);
    assert_eq!(pool.size(), 1);
}

#[test]
fn test_exclusive_contention() {
    let pool = Arc::new(GraphPool::new(2, Duration::from_secs(60)));
    let f = frame(640, 480, PixelFormat::Rgb24);

    // Thread A holds the lease.
    let held = pool.lease(&f, "null", false).expect("initial lease");

    // B without waiting: immediate None.
    assert!(pool.lease(&f, "null", false).is_none());

    // B with waiting while A holds throughout: gives up after the full
    // back-off ladder (10+20+40+80+160 = 310 ms).
    let contender = {
        let pool = Arc::clone(&pool);
        let f = f.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let result = pool.lease(&f, "null", true);
            (result.is_none(), start.elapsed())
        })
    };
    let (gave_up, elapsed) = contender.join().unwrap();
    assert!(gave_up);
    assert!(
        elapsed >= Duration::from_millis(310),
        "back-off finished too early: {:?}",
        elapsed
    );

    // A releases; B succeeds.
    drop(held);
    assert!(pool.lease(&f, "null", true).is_some());
}

#[test]
fn test_waiting_contender_wins_after_release() {
    let pool = Arc::new(GraphPool::new(2, Duration::from_secs(60)));
    let f = frame(320, 240, PixelFormat::Rgb24);

    let held = pool.lease(&f, "null", false).expect("initial lease");

    let contender = {
        let pool = Arc::clone(&pool);
        let f = f.clone();
        thread::spawn(move || pool.lease(&f, "null", true).is_some())
    };

    // Release while the contender is inside its back-off ladder.
    thread::sleep(Duration::from_millis(40));
    drop(held);

    assert!(contender.join().unwrap());
}

#[test]
fn test_eviction_keeps_pool_at_capacity() {
    let pool = GraphPool::new(1, Duration::from_secs(60));
    let f = frame(64, 64, PixelFormat::Rgb24);

    drop(pool.lease(&f, "null", false).expect("f1"));
    drop(pool.lease(&f, "hflip", false).expect("f2 after evicting f1"));
    assert_eq!(pool.size(), 1);

    let remaining = pool.snapshot();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].descriptor, "hflip");
}

#[test]
fn test_full_of_in_use_rejects_then_admits() {
    let pool = GraphPool::new(1, Duration::from_secs(60));
    let f = frame(64, 64, PixelFormat::Rgb24);

    let held = pool.lease(&f, "null", false).expect("f1");
    // Admission failure: the only entry is in use.
    assert!(pool.lease(&f, "hflip", false).is_none());

    drop(held);
    assert!(pool.lease(&f, "hflip", false).is_some());
}

#[test]
fn test_sweep_expired_after_timeout() {
    let pool = GraphPool::new(4, Duration::from_secs(1));
    let f = frame(64, 64, PixelFormat::Rgb24);

    drop(pool.lease(&f, "null", false).expect("lease"));
    thread::sleep(Duration::from_secs(2));

    assert_eq!(pool.sweep_expired(), 1);
    assert_eq!(pool.size(), 0);
}

#[test]
fn test_expiry_monotone_in_timeout() {
    // A sweep under a longer timeout removes no more than one under a
    // shorter timeout for the same pool state.
    let pool = GraphPool::new(4, Duration::from_secs(300));
    let f = frame(64, 64, PixelFormat::Rgb24);
    drop(pool.lease(&f, "null", false).unwrap());
    drop(pool.lease(&f, "hflip", false).unwrap());

    thread::sleep(Duration::from_millis(50));

    pool.set_cleanup_timeout(Duration::from_secs(300));
    assert_eq!(pool.sweep_expired(), 0);

    pool.set_cleanup_timeout(Duration::from_millis(10));
    assert_eq!(pool.sweep_expired(), 2);
}

#[test]
fn test_exclusivity_under_contention() {
    // At any instant, leases-minus-releases for one fingerprint is 0 or 1.
    let pool = Arc::new(GraphPool::new(2, Duration::from_secs(60)));
    let holders = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..4 {
        let pool = Arc::clone(&pool);
        let holders = Arc::clone(&holders);
        let max_seen = Arc::clone(&max_seen);
        threads.push(thread::spawn(move || {
            let f = Frame::new(128, 128, PixelFormat::Rgb24).unwrap();
            let mut leased = 0;
            for _ in 0..20 {
                if let Some(lease) = pool.lease(&f, "grayscale", true) {
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(200));
                    holders.fetch_sub(1, Ordering::SeqCst);
                    drop(lease);
                    leased += 1;
                }
            }
            leased
        }));
    }

    let total: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
    assert!(total > 0);
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().in_use, 0);
}

#[test]
fn test_concurrent_miss_single_insertion() {
    // Many threads miss on the same fingerprint at once; the pool must
    // end up with exactly one entry for it.
    let pool = Arc::new(GraphPool::new(8, Duration::from_secs(60)));

    let mut threads = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        threads.push(thread::spawn(move || {
            let f = Frame::new(256, 256, PixelFormat::Rgb24).unwrap();
            pool.process_frame(&f, "scale=128:128").is_ok()
        }));
    }
    for t in threads {
        assert!(t.join().unwrap());
    }

    assert_eq!(pool.size(), 1);
    let entries = pool.snapshot();
    assert_eq!(entries[0].descriptor, "scale=128:128");
}

#[test]
fn test_distinct_pixel_formats_are_distinct_entries() {
    let pool = GraphPool::new(8, Duration::from_secs(60));

    let rgb = frame(64, 64, PixelFormat::Rgb24);
    let rgba = frame(64, 64, PixelFormat::Rgba);
    drop(pool.lease(&rgb, "null", false).unwrap());
    drop(pool.lease(&rgba, "null", false).unwrap());

    assert_eq!(pool.size(), 2);
}

#[test]
fn test_clear_detaches_leased_entries() {
    let pool = GraphPool::new(4, Duration::from_secs(60));
    let f = frame(64, 64, PixelFormat::Rgb24);

    let lease = pool.lease(&f, "null", false).unwrap();
    pool.clear();
    assert_eq!(pool.size(), 0);

    // A fresh lease on the same fingerprint builds a new graph; the
    // detached one stays alive through the outstanding lease.
    let fresh = pool.lease(&f, "null", false).unwrap();
    assert_ne!(fresh.graph_id(), lease.graph_id());
}

#[test]
fn test_capacity_bound_holds() {
    let pool = GraphPool::new(3, Duration::from_secs(60));
    let descriptors = ["null", "hflip", "vflip", "grayscale", "scale=32:32"];
    let f = frame(64, 64, PixelFormat::Rgb24);

    for descriptor in descriptors {
        drop(pool.lease(&f, descriptor, false).unwrap());
        assert!(pool.size() <= 3);
    }
    assert_eq!(pool.size(), 3);
}
