//! Observational notifications for a display collaborator.
//!
//! Nothing in the pipeline depends on how these are consumed. Events are
//! emitted from the coordinating thread once a stage's tiles have finished,
//! in tile order.

use crate::chunks::ChunkBoundary;
use crate::refinement::Discard;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProgressEvent {
    BlurredChunk {
        octave: usize,
        scale: usize,
        boundary: ChunkBoundary,
    },
    BlurredImage {
        octave: usize,
        scale: usize,
        blur_level: f64,
    },
    DogChunk {
        octave: usize,
        scale: usize,
        boundary: ChunkBoundary,
    },
    DogImage {
        octave: usize,
        scale: usize,
    },
    CandidateMarker {
        octave: usize,
        scale: usize,
        x: usize,
        y: usize,
        low_contrast: bool,
    },
    Refined {
        octave: usize,
        scale: usize,
        /// `None` when the candidate converged.
        discard: Option<Discard>,
    },
}

pub trait ProgressSink {
    fn notify(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn notify(&self, _event: ProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent),
{
    fn notify(&self, event: ProgressEvent) {
        self(event)
    }
}
