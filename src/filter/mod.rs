//! The software filter-graph primitive.
//!
//! A filter graph is built from a textual descriptor
//! (`"scale=800:600,hue=h=30:s=1"`), validated against a fixed input
//! geometry, and then driven through a two-step stateful handshake:
//! frames are pushed into the graph's source endpoint and pulled from
//! its sink endpoint. A graph is single-threaded-stateful; callers must
//! not interleave push/pull sequences from multiple threads (the pool's
//! lease protocol enforces this).
//!
//! # Supported filters
//!
//! | Filter | Syntax | Notes |
//! |--------|--------|-------|
//! | `null` | `null` | Pass-through |
//! | `scale` | `scale=W:H` | Bilinear resampling |
//! | `hue` | `hue=h=DEG:s=SAT` | Hue rotation and saturation |
//! | `crop` | `crop=W:H:X:Y` | Rectangular crop |
//! | `hflip` | `hflip` | Horizontal mirror |
//! | `vflip` | `vflip` | Vertical mirror |
//! | `grayscale` | `grayscale` | Desaturate in place |
//! | `format` | `format=PIXFMT` | Pixel format conversion |

mod graph;
mod ops;
pub mod parser;

pub use graph::{FilterGraph, Pull};
pub use ops::{FilterOp, HueState};

pub(crate) use ops::convert as ops_convert;

use crate::frame::PixelFormat;
use thiserror::Error;

/// Errors from filter graph construction and processing.
///
/// Construction errors (`Parse`, `UnknownFilter`, `BadArgument`,
/// `UnsupportedFormat`) surface from [`FilterGraph::build`];
/// processing errors surface from the push/pull handshake. The pool
/// forwards these unmodified so callers can tell the cases apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The descriptor failed to parse.
    #[error("descriptor parse error: {0}")]
    Parse(String),

    /// The descriptor names a filter that does not exist.
    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    /// A filter received a missing, malformed or out-of-range argument.
    #[error("filter '{filter}': {message}")]
    BadArgument {
        /// Name of the offending filter.
        filter: &'static str,
        /// What was wrong with the arguments.
        message: String,
    },

    /// A filter cannot operate on the negotiated pixel format.
    #[error("filter '{filter}' does not support pixel format {format:?}")]
    UnsupportedFormat {
        /// Name of the offending filter.
        filter: &'static str,
        /// The rejected pixel format.
        format: PixelFormat,
    },

    /// A pushed frame does not match the geometry the graph was built for.
    #[error(
        "frame {got_width}x{got_height} {got_format:?} does not match graph input \
         {width}x{height} {format:?}"
    )]
    InputMismatch {
        /// Width the graph was built for.
        width: u32,
        /// Height the graph was built for.
        height: u32,
        /// Pixel format the graph was built for.
        format: PixelFormat,
        /// Width of the rejected frame.
        got_width: u32,
        /// Height of the rejected frame.
        got_height: u32,
        /// Pixel format of the rejected frame.
        got_format: PixelFormat,
    },

    /// The sink has no frame ready; push more input first.
    #[error("no frame ready at the graph sink")]
    TryAgain,

    /// The source was closed and all queued frames have been drained.
    #[error("graph reached end of stream")]
    Eos,
}
