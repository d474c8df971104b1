//! End-to-end batch pipeline tests: decode, filter, encode through the
//! worker pool and the shared graph pool.

use refract::codec::{OutputFormat, decode_image, encode_image};
use refract::frame::{Frame, PixelFormat};
use refract::pool::GraphPool;
use refract::processor::{BatchProcessor, ProcessConfig};
use refract::worker::{RejectPolicy, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Write `count` synthetic PNG images into `dir`.
fn write_test_images(dir: &std::path::Path, count: usize, width: u32, height: u32) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for i in 0..count {
        let mut frame = Frame::new(width, height, PixelFormat::Rgb24).unwrap();
        for (j, byte) in frame.data_mut().iter_mut().enumerate() {
            *byte = ((i * 31 + j) % 255) as u8;
        }
        let path = dir.join(format!("image_{i:02}.png"));
        encode_image(&frame, &path, OutputFormat::Png).unwrap();
        paths.push(path);
    }
    paths
}

#[test]
fn test_batch_resizes_and_writes_outputs() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();
    let inputs = write_test_images(input_dir.path(), 6, 64, 48);

    let pool = Arc::new(GraphPool::new(8, Duration::from_secs(60)));
    let batch = BatchProcessor::with_pools(
        ProcessConfig {
            target_width: 32,
            target_height: 24,
            filter_desc: "grayscale".into(),
            output_format: OutputFormat::Png,
        },
        Arc::clone(&pool),
        WorkerPool::new(4, 64, RejectPolicy::Block),
    )
    .unwrap();

    let report = batch.process_batch(&inputs, output_dir.path()).unwrap();
    assert_eq!(report.succeeded, 6);
    assert_eq!(report.failed, 0);

    for i in 0..6 {
        let out = output_dir.path().join(format!("image_{i:02}.png"));
        let decoded = decode_image(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
        // Grayscale output: all channels equal.
        let px = &decoded.data()[..3];
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    // All inputs share one fingerprint, so the whole batch used a
    // single cached graph.
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.stats().in_use, 0);
}

#[test]
fn test_batch_counts_undecodable_files() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();

    let mut inputs = write_test_images(input_dir.path(), 2, 16, 16);
    let junk = input_dir.path().join("broken.png");
    std::fs::write(&junk, b"definitely not a png").unwrap();
    inputs.push(junk);

    let batch = BatchProcessor::with_pools(
        ProcessConfig {
            filter_desc: "hflip".into(),
            ..Default::default()
        },
        Arc::new(GraphPool::new(4, Duration::from_secs(60))),
        WorkerPool::new(2, 16, RejectPolicy::Block),
    )
    .unwrap();

    let report = batch.process_batch(&inputs, output_dir.path()).unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
}

#[test]
fn test_mixed_geometries_build_separate_graphs() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();

    let mut inputs = write_test_images(input_dir.path(), 2, 40, 40);
    // Same descriptor but different input geometry: separate fingerprint.
    let mut frame = Frame::new(20, 20, PixelFormat::Rgb24).unwrap();
    frame.data_mut().fill(80);
    let odd_one = input_dir.path().join("small.png");
    encode_image(&frame, &odd_one, OutputFormat::Png).unwrap();
    inputs.push(odd_one);

    let pool = Arc::new(GraphPool::new(8, Duration::from_secs(60)));
    let batch = BatchProcessor::with_pools(
        ProcessConfig {
            target_width: 10,
            target_height: 10,
            ..Default::default()
        },
        Arc::clone(&pool),
        WorkerPool::new(4, 16, RejectPolicy::Block),
    )
    .unwrap();

    let report = batch.process_batch(&inputs, output_dir.path()).unwrap();
    assert_eq!(report.succeeded, 3);
    assert_eq!(pool.size(), 2);
}

#[test]
fn test_process_dir_lists_sorted_inputs() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();
    write_test_images(input_dir.path(), 3, 16, 16);

    let batch = BatchProcessor::with_pools(
        ProcessConfig {
            filter_desc: "vflip".into(),
            ..Default::default()
        },
        Arc::new(GraphPool::new(4, Duration::from_secs(60))),
        WorkerPool::new(2, 16, RejectPolicy::Block),
    )
    .unwrap();

    let report = batch
        .process_dir(input_dir.path(), output_dir.path())
        .unwrap();
    assert_eq!(report.succeeded, 3);

    let outputs = std::fs::read_dir(output_dir.path()).unwrap().count();
    assert_eq!(outputs, 3);
}

#[test]
fn test_single_file_round_trip_preserves_content() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();

    // A pure-copy pipeline (null filter) must reproduce the pixels.
    let mut original = Frame::new(24, 24, PixelFormat::Rgb24).unwrap();
    for (i, byte) in original.data_mut().iter_mut().enumerate() {
        *byte = (i % 253) as u8;
    }
    let input = input_dir.path().join("source.png");
    encode_image(&original, &input, OutputFormat::Png).unwrap();

    let batch = BatchProcessor::with_pools(
        ProcessConfig {
            filter_desc: "null".into(),
            ..Default::default()
        },
        Arc::new(GraphPool::new(4, Duration::from_secs(60))),
        WorkerPool::new(1, 4, RejectPolicy::Block),
    )
    .unwrap();

    let output = batch.process_file(&input, output_dir.path()).unwrap();
    let decoded = decode_image(&output).unwrap();
    assert_eq!(decoded.data(), original.data());
}
