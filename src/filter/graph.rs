//! Filter graph construction and the push/pull handshake.

use super::parser::parse_chain;
use super::{FilterError, FilterOp};
use crate::frame::{Frame, PixelFormat};
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Result of pulling from a graph's sink endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Pull {
    /// A filtered frame is ready.
    Frame(Frame),
    /// No frame is ready; push more input first.
    Again,
    /// The source was closed and everything queued has been drained.
    Eos,
}

/// Input endpoint of a graph: frames queued for processing.
#[derive(Debug, Default)]
struct BufferSource {
    queue: VecDeque<Frame>,
    closed: bool,
}

/// A built filter graph: a validated chain of stages bound to one input
/// geometry, with source and sink endpoints.
///
/// Construction is the expensive step: the descriptor is parsed, every
/// stage's arguments are resolved (including precomputed color
/// matrices), and the whole topology is validated against the input
/// geometry. Feeding is a two-step stateful handshake:
///
/// ```rust
/// use refract::filter::{FilterGraph, Pull};
/// use refract::frame::{Frame, PixelFormat};
///
/// let mut graph = FilterGraph::build(64, 64, PixelFormat::Rgb24, "hflip").unwrap();
/// let input = Frame::new(64, 64, PixelFormat::Rgb24).unwrap();
///
/// graph.push_frame(&input).unwrap();
/// match graph.pull_frame().unwrap() {
///     Pull::Frame(out) => assert_eq!(out.width(), 64),
///     other => panic!("expected a frame, got {:?}", other),
/// }
/// ```
///
/// A graph is **not** thread-safe in the sense of concurrent handshakes:
/// the push/pull sequence of one frame must not interleave with another
/// user of the same graph. The pool's lease protocol guarantees this.
#[derive(Debug)]
pub struct FilterGraph {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    out_width: u32,
    out_height: u32,
    out_format: PixelFormat,
    stages: SmallVec<[FilterOp; 4]>,
    source: BufferSource,
    frames_filtered: u64,
}

impl FilterGraph {
    /// Build a graph for the given input geometry and descriptor.
    ///
    /// Parses the descriptor, resolves every stage's arguments, and
    /// validates the stage chain end to end. Returns the originating
    /// [`FilterError`] on any failure; nothing is partially built.
    pub fn build(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        descriptor: &str,
    ) -> Result<Self, FilterError> {
        let parsed = parse_chain(descriptor)?;

        let mut stages: SmallVec<[FilterOp; 4]> = SmallVec::with_capacity(parsed.len());
        let (mut w, mut h, mut fmt) = (width, height, pixel_format);
        for entry in &parsed {
            let stage = FilterOp::from_parsed(entry)?;
            (w, h, fmt) = stage.plan(w, h, fmt)?;
            stages.push(stage);
        }

        debug!(
            width,
            height,
            ?pixel_format,
            out_width = w,
            out_height = h,
            out_format = ?fmt,
            stages = stages.len(),
            "built filter graph"
        );

        Ok(Self {
            width,
            height,
            pixel_format,
            out_width: w,
            out_height: h,
            out_format: fmt,
            stages,
            source: BufferSource::default(),
            frames_filtered: 0,
        })
    }

    /// Input geometry the graph was built for.
    pub fn input_geometry(&self) -> (u32, u32, PixelFormat) {
        (self.width, self.height, self.pixel_format)
    }

    /// Output geometry produced by the stage chain.
    pub fn output_geometry(&self) -> (u32, u32, PixelFormat) {
        (self.out_width, self.out_height, self.out_format)
    }

    /// Number of frames that have passed through the full chain.
    pub fn frames_filtered(&self) -> u64 {
        self.frames_filtered
    }

    /// Push a frame into the source endpoint.
    ///
    /// The caller keeps its frame; the graph works on a copy. Returns
    /// `InputMismatch` if the frame geometry differs from what the
    /// graph was built for, `Eos` if the source was closed.
    pub fn push_frame(&mut self, frame: &Frame) -> Result<(), FilterError> {
        if self.source.closed {
            return Err(FilterError::Eos);
        }
        if frame.width() != self.width
            || frame.height() != self.height
            || frame.pixel_format() != self.pixel_format
        {
            return Err(FilterError::InputMismatch {
                width: self.width,
                height: self.height,
                format: self.pixel_format,
                got_width: frame.width(),
                got_height: frame.height(),
                got_format: frame.pixel_format(),
            });
        }
        self.source.queue.push_back(frame.clone());
        Ok(())
    }

    /// Close the source endpoint; once the queue drains, pulls return
    /// [`Pull::Eos`].
    pub fn close_source(&mut self) {
        self.source.closed = true;
    }

    /// Pull the next filtered frame from the sink endpoint.
    ///
    /// Runs one queued input frame through the stage chain. Stage
    /// errors propagate unmodified; the offending input frame is
    /// consumed either way.
    pub fn pull_frame(&mut self) -> Result<Pull, FilterError> {
        let Some(input) = self.source.queue.pop_front() else {
            return if self.source.closed {
                Ok(Pull::Eos)
            } else {
                Ok(Pull::Again)
            };
        };

        let mut frame = input;
        for stage in &self.stages {
            trace!(stage = stage.name(), "applying filter stage");
            frame = stage.apply(&frame)?;
        }
        self.frames_filtered += 1;
        Ok(Pull::Frame(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(width, height, PixelFormat::Rgb24).unwrap()
    }

    #[test]
    fn test_build_validates_topology() {
        // A crop that only fits before scaling must be planned against
        // the scaled geometry, not the input.
        assert!(FilterGraph::build(100, 100, PixelFormat::Rgb24, "scale=10:10,crop=50:50").is_err());
        assert!(FilterGraph::build(100, 100, PixelFormat::Rgb24, "crop=50:50,scale=10:10").is_ok());
    }

    #[test]
    fn test_build_reports_output_geometry() {
        let graph =
            FilterGraph::build(100, 80, PixelFormat::Rgb24, "scale=50:40,format=gray8").unwrap();
        assert_eq!(graph.output_geometry(), (50, 40, PixelFormat::Gray8));
    }

    #[test]
    fn test_push_pull_round_trip() {
        let mut graph = FilterGraph::build(8, 8, PixelFormat::Rgb24, "null").unwrap();
        graph.push_frame(&frame(8, 8)).unwrap();
        match graph.pull_frame().unwrap() {
            Pull::Frame(out) => assert_eq!(out.width(), 8),
            other => panic!("expected frame, got {:?}", other),
        }
        assert_eq!(graph.frames_filtered(), 1);
    }

    #[test]
    fn test_pull_without_push_is_again() {
        let mut graph = FilterGraph::build(8, 8, PixelFormat::Rgb24, "null").unwrap();
        assert_eq!(graph.pull_frame().unwrap(), Pull::Again);
    }

    #[test]
    fn test_eos_after_close() {
        let mut graph = FilterGraph::build(8, 8, PixelFormat::Rgb24, "null").unwrap();
        graph.push_frame(&frame(8, 8)).unwrap();
        graph.close_source();

        assert!(matches!(graph.pull_frame().unwrap(), Pull::Frame(_)));
        assert_eq!(graph.pull_frame().unwrap(), Pull::Eos);
        assert_eq!(graph.push_frame(&frame(8, 8)), Err(FilterError::Eos));
    }

    #[test]
    fn test_mismatched_frame_rejected() {
        let mut graph = FilterGraph::build(8, 8, PixelFormat::Rgb24, "null").unwrap();
        let err = graph.push_frame(&frame(16, 16)).unwrap_err();
        assert!(matches!(err, FilterError::InputMismatch { .. }));
    }

    #[test]
    fn test_bad_descriptor_fails_build() {
        assert!(matches!(
            FilterGraph::build(8, 8, PixelFormat::Rgb24, ""),
            Err(FilterError::Parse(_))
        ));
        assert!(matches!(
            FilterGraph::build(8, 8, PixelFormat::Rgb24, "sepia"),
            Err(FilterError::UnknownFilter(_))
        ));
    }

    #[test]
    fn test_chain_applies_in_order() {
        let mut graph =
            FilterGraph::build(4, 2, PixelFormat::Rgb24, "crop=2:2:0:0,hflip").unwrap();
        let mut input = frame(4, 2);
        // First pixel red, second green.
        input.data_mut()[0] = 255;
        input.data_mut()[4] = 255;

        graph.push_frame(&input).unwrap();
        let Pull::Frame(out) = graph.pull_frame().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(out.width(), 2);
        // After the crop the first row is [red, green]; hflip makes it
        // [green, red].
        assert_eq!(out.data()[1], 255);
        assert_eq!(out.data()[3], 255);
    }
}
