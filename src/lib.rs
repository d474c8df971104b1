//! # Refract
//!
//! A batch image-processing pipeline built around a pooled filter-graph
//! cache.
//!
//! Refract decodes images, applies a parameterizable chain of
//! video-style filter transforms (scale, hue, crop, ...), and re-encodes
//! the result. Filter graphs are expensive to build and stateful to
//! use, so they are cached in a concurrent, bounded, time-expiring
//! [`GraphPool`](pool::GraphPool) keyed by the frame geometry and the
//! descriptor text, and driven by a priority-scheduled
//! [`WorkerPool`](worker::WorkerPool).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use refract::prelude::*;
//!
//! # fn main() -> refract::Result<()> {
//! // Batch: resize to 800x600, rotate hue 30 degrees, write PNGs.
//! let config = ProcessConfig {
//!     target_width: 800,
//!     target_height: 600,
//!     filter_desc: "hue=h=30:s=1".into(),
//!     output_format: OutputFormat::Png,
//! };
//! let batch = BatchProcessor::new(config)?;
//! let report = batch.process_dir("photos/".as_ref(), "out/".as_ref())?;
//! println!("{} ok, {} failed", report.succeeded, report.failed);
//!
//! // Or frame-by-frame through a shared pool:
//! use std::sync::Arc;
//! use std::time::Duration;
//! let pool = Arc::new(GraphPool::new(16, Duration::from_secs(120)));
//! let processor = FrameProcessor::new(pool, "scale=64:64,grayscale")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod filter;
pub mod frame;
pub mod observability;
pub mod pool;
pub mod processor;
pub mod worker;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::codec::OutputFormat;
    pub use crate::error::{Error, Result};
    pub use crate::frame::{Frame, PixelFormat};
    pub use crate::pool::{GraphLease, GraphPool};
    pub use crate::processor::{BatchProcessor, FrameProcessor, ProcessConfig};
    pub use crate::worker::{RejectPolicy, TaskPriority, WorkerPool};
}

pub use error::{Error, Result};
