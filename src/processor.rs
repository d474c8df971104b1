//! Frame processing facade and the batch driver.
//!
//! [`FrameProcessor`] binds one filter descriptor at construction and
//! processes already-decoded frames through a shared [`GraphPool`].
//! [`BatchProcessor`] drives whole directories of image files through
//! the decode → filter → encode pipeline on a [`WorkerPool`].

use crate::codec::{self, OutputFormat};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::pool::GraphPool;
use crate::worker::{SubmitOptions, TaskPriority, WorkerPool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Statistics name under which batch jobs are accounted.
const BATCH_TASK_NAME: &str = "process-image";

/// Configuration for a batch processing run.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// Target width; 0 keeps the source width.
    pub target_width: u32,
    /// Target height; 0 keeps the source height.
    pub target_height: u32,
    /// Filter chain applied after the optional scale.
    pub filter_desc: String,
    /// Output container.
    pub output_format: OutputFormat,
}

impl ProcessConfig {
    /// Compose the effective descriptor: a `scale=W:H` stage (when
    /// target dimensions are set) followed by the configured chain.
    pub fn descriptor(&self) -> String {
        let scale = if self.target_width > 0 && self.target_height > 0 {
            format!("scale={}:{}", self.target_width, self.target_height)
        } else {
            String::new()
        };

        match (scale.is_empty(), self.filter_desc.is_empty()) {
            (false, false) => format!("{},{}", scale, self.filter_desc),
            (false, true) => scale,
            (true, _) => self.filter_desc.clone(),
        }
    }
}

/// Stateless facade over the graph pool: one descriptor, frames in,
/// frames out.
///
/// Every frame submitted through one processor sees the same
/// transform; graphs are shared through the pool with other
/// processors keyed by the same fingerprint.
#[derive(Debug, Clone)]
pub struct FrameProcessor {
    pool: Arc<GraphPool>,
    descriptor: String,
}

impl FrameProcessor {
    /// Create a processor bound to `descriptor`.
    ///
    /// Returns `InvalidInput` for an empty descriptor.
    pub fn new(pool: Arc<GraphPool>, descriptor: impl Into<String>) -> Result<Self> {
        let descriptor = descriptor.into();
        if descriptor.is_empty() {
            return Err(Error::InvalidInput(
                "filter descriptor must not be empty".into(),
            ));
        }
        Ok(Self { pool, descriptor })
    }

    /// Create a processor from a batch configuration.
    pub fn from_config(pool: Arc<GraphPool>, config: &ProcessConfig) -> Result<Self> {
        Self::new(pool, config.descriptor())
    }

    /// The bound descriptor.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// The underlying graph pool.
    pub fn pool(&self) -> &Arc<GraphPool> {
        &self.pool
    }

    /// Process one decoded frame, returning the filtered frame.
    pub fn process(&self, frame: &Frame) -> Result<Frame> {
        self.pool.process_frame(frame, &self.descriptor)
    }
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Files processed and written successfully.
    pub succeeded: usize,
    /// Files that failed to decode, filter or encode.
    pub failed: usize,
}

/// Drives image files through decode → filter → encode on a worker
/// pool, sharing filter graphs through a [`GraphPool`].
pub struct BatchProcessor {
    processor: FrameProcessor,
    workers: WorkerPool,
    output_format: OutputFormat,
}

impl BatchProcessor {
    /// Create a batch processor with default-sized pools.
    pub fn new(config: ProcessConfig) -> Result<Self> {
        Self::with_pools(config, Arc::new(GraphPool::default()), WorkerPool::with_default_size())
    }

    /// Create a batch processor over explicit pools.
    pub fn with_pools(
        config: ProcessConfig,
        pool: Arc<GraphPool>,
        workers: WorkerPool,
    ) -> Result<Self> {
        let processor = FrameProcessor::from_config(pool, &config)?;
        Ok(Self {
            processor,
            workers,
            output_format: config.output_format,
        })
    }

    /// The frame processor used for each file.
    pub fn processor(&self) -> &FrameProcessor {
        &self.processor
    }

    /// The worker pool executing jobs.
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Process one image file, writing the result into `output_dir`.
    /// Returns the output path.
    pub fn process_file(&self, input: &Path, output_dir: &Path) -> Result<PathBuf> {
        let frame = codec::decode_image(input)?;
        let filtered = self.processor.process(&frame)?;

        let output = output_path(output_dir, input, self.output_format);
        codec::encode_image(&filtered, &output, self.output_format)?;
        debug!(input = %input.display(), output = %output.display(), "processed image");
        Ok(output)
    }

    /// Process a batch of image files concurrently.
    ///
    /// One job per path is submitted to the worker pool; the call
    /// blocks until every job reaches a terminal state. Per-file
    /// failures are logged and counted, never propagated.
    pub fn process_batch(&self, inputs: &[PathBuf], output_dir: &Path) -> Result<BatchReport> {
        std::fs::create_dir_all(output_dir)?;

        let mut handles = Vec::with_capacity(inputs.len());
        for input in inputs {
            let processor = self.processor.clone();
            let output_format = self.output_format;
            let input = input.clone();
            let output_dir = output_dir.to_path_buf();

            let handle = self.workers.submit_with(
                move || {
                    let frame = codec::decode_image(&input)?;
                    let filtered = processor.process(&frame)?;
                    let output = output_path(&output_dir, &input, output_format);
                    codec::encode_image(&filtered, &output, output_format)?;
                    Ok(output)
                },
                SubmitOptions::default()
                    .priority(TaskPriority::Normal)
                    .name(BATCH_TASK_NAME),
            )?;
            handles.push(handle);
        }

        let mut report = BatchReport::default();
        for handle in handles {
            match handle.wait() {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    warn!(error = %e, "image job failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "batch finished"
        );
        self.processor.pool().log_status();
        Ok(report)
    }

    /// Process every regular file in `input_dir`.
    pub fn process_dir(&self, input_dir: &Path, output_dir: &Path) -> Result<BatchReport> {
        let inputs = list_image_files(input_dir)?;
        self.process_batch(&inputs, output_dir)
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        self.workers.shutdown_graceful();
    }
}

/// Derive `<output_dir>/<input_stem>.<ext>` for an input file.
pub fn output_path(output_dir: &Path, input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output_dir.join(format!("{}.{}", stem, format.extension()))
}

/// List the regular files in a directory, sorted for deterministic
/// submission order.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::time::Duration;

    fn pool() -> Arc<GraphPool> {
        Arc::new(GraphPool::new(8, Duration::from_secs(60)))
    }

    #[test]
    fn test_descriptor_composition() {
        let config = ProcessConfig {
            target_width: 800,
            target_height: 600,
            filter_desc: "hue=h=30:s=1".into(),
            output_format: OutputFormat::Png,
        };
        assert_eq!(config.descriptor(), "scale=800:600,hue=h=30:s=1");

        let scale_only = ProcessConfig {
            target_width: 800,
            target_height: 600,
            ..Default::default()
        };
        assert_eq!(scale_only.descriptor(), "scale=800:600");

        let filter_only = ProcessConfig {
            filter_desc: "hflip".into(),
            ..Default::default()
        };
        assert_eq!(filter_only.descriptor(), "hflip");
    }

    #[test]
    fn test_empty_descriptor_rejected() {
        let config = ProcessConfig::default();
        assert!(matches!(
            FrameProcessor::from_config(pool(), &config),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_process_applies_descriptor() {
        let processor = FrameProcessor::new(pool(), "scale=16:8").unwrap();
        let frame = Frame::new(64, 64, PixelFormat::Rgb24).unwrap();
        let out = processor.process(&frame).unwrap();
        assert_eq!((out.width(), out.height()), (16, 8));
    }

    #[test]
    fn test_processors_share_graphs_via_pool() {
        let shared = pool();
        let a = FrameProcessor::new(Arc::clone(&shared), "hflip").unwrap();
        let b = FrameProcessor::new(Arc::clone(&shared), "hflip").unwrap();
        let frame = Frame::new(32, 32, PixelFormat::Rgb24).unwrap();

        a.process(&frame).unwrap();
        b.process(&frame).unwrap();
        // Same fingerprint: both processors used one cached graph.
        assert_eq!(shared.size(), 1);
    }

    #[test]
    fn test_output_path_derivation() {
        let out = output_path(
            Path::new("/out"),
            Path::new("/in/photo.jpeg"),
            OutputFormat::Png,
        );
        assert_eq!(out, PathBuf::from("/out/photo.png"));
    }
}
