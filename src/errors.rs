use thiserror::Error;

/// Failures that abort a pipeline stage.
///
/// Numerical degeneracy and boundary exhaustion during refinement are not
/// errors; they are reported as [`crate::Discard`] outcomes instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(
        "sigma schedule is not increasing at octave {octave}, scale {scale}: \
         target {target} <= base {base}"
    )]
    NonIncreasingSigma {
        octave: usize,
        scale: usize,
        target: f64,
        base: f64,
    },
    #[error("{requested} octaves requested but the image only supports {max}")]
    TooManyOctaves { requested: usize, max: usize },
    #[error("input image has no pixels")]
    EmptyImage,
    #[error("malformed scale space: {0}")]
    MalformedScaleSpace(String),
    #[error("malformed difference of Gaussians: {0}")]
    MalformedDog(String),
    #[error("malformed candidate set: {0}")]
    MalformedCandidates(String),
    #[error("{0} requested before its input stage completed")]
    StageOrder(&'static str),
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
