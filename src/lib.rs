//! Scale-invariant keypoint detection.
//!
//! The pipeline has four stages, each consuming the complete output of the
//! previous one:
//!
//! 1. [`Sift::build_scale_space`] - a Gaussian pyramid of `num_octaves`
//!    octaves with `scales_per_octave + 3` blur levels each.
//! 2. [`Sift::build_dog`] - differences of adjacent blur levels.
//! 3. [`Sift::find_candidates`] - strict 26 neighbor extrema of the DoG.
//! 4. [`Sift::refine`] - sub-pixel quadratic fit with contrast and edge
//!    rejection.
//!
//! Within a stage the work is split into tiles (see [`chunks`]), which run
//! in parallel with the `rayon` feature. Results do not depend on the tile
//! size or on the order in which tiles complete.

pub mod chunks;
mod dog;
mod errors;
mod extrema;
pub mod image;
pub mod matrix;
pub mod pipeline;
pub mod progress;
mod refinement;
mod scale_space;

pub use crate::dog::DifferenceOfGaussians;
pub use crate::errors::{Error, Result};
pub use crate::extrema::{find_extrema, Candidates, Detection, Extremum, ScaleCandidates};
pub use crate::image::GrayFloatImage;
pub use crate::pipeline::{CancelToken, Pipeline, Request, Response};
pub use crate::progress::{NoProgress, ProgressEvent, ProgressSink};
pub use crate::refinement::{
    gradient, hessian, Discard, DiscardCounts, Outcome, RefinedKeypoint, Refinement,
};
pub use crate::scale_space::{Octave, ScaleLevel, ScaleSpace};

use ::image::DynamicImage;

/// Contains the configuration parameters of SIFT detection.
///
/// The defaults follow Lowe's paper for three scales per octave. The
/// contrast threshold is scaled for other values of `scales_per_octave`,
/// see [`Sift::contrast_threshold_for_scales`].
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sift {
    /// Number of octaves in the scale space
    pub num_octaves: usize,

    /// Number of scales sampled per doubling of sigma
    pub scales_per_octave: usize,

    /// Blur level of the first image of the first octave (sigma units)
    pub min_blur_level: f64,

    /// Blur assumed to already be present in the input image
    pub assumed_blur: f64,

    /// Side length of the square tiles that blur and subtraction are split into
    pub chunk_size: usize,

    /// Distance between pixels of the first octave in input pixel units
    pub min_interpixel_distance: f64,

    /// DoG contrast threshold for three scales per octave
    pub contrast_threshold: f64,

    /// Fraction of the contrast threshold applied to raw DoG extrema
    pub detection_threshold_factor: f64,

    /// Maximum ratio between the principal curvatures (`c_edge`)
    pub edge_threshold: f64,

    /// Largest offset from the sample for which a quadratic fit is accepted
    pub max_offset: f64,

    /// Number of quadratic fits attempted per candidate
    pub max_refinement_iterations: usize,
}

impl Default for Sift {
    fn default() -> Sift {
        Sift {
            num_octaves: 5,
            scales_per_octave: 3,
            min_blur_level: 0.8,
            assumed_blur: 0.5,
            chunk_size: 32,
            min_interpixel_distance: 0.5,
            contrast_threshold: 0.015,
            detection_threshold_factor: 0.8,
            edge_threshold: 10.0,
            max_offset: 0.6,
            max_refinement_iterations: 5,
        }
    }
}

impl Sift {
    /// This convenience constructor is provided for the common case of
    /// choosing the pyramid shape and keeping every other default.
    pub fn new(num_octaves: usize, scales_per_octave: usize) -> Self {
        Self {
            num_octaves,
            scales_per_octave,
            ..Default::default()
        }
    }

    /// Create a `Sift` that sparsely detects features.
    ///
    /// Uses a contrast threshold of `0.03` (default is `0.015`).
    pub fn sparse() -> Self {
        Self {
            contrast_threshold: 0.03,
            ..Default::default()
        }
    }

    /// Create a `Sift` that densely detects features.
    ///
    /// Uses a contrast threshold of `0.0075` (default is `0.015`).
    pub fn dense() -> Self {
        Self {
            contrast_threshold: 0.0075,
            ..Default::default()
        }
    }

    /// Reject configurations no pipeline can run with.
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if self.num_octaves == 0 {
            return Err(Error::InvalidConfig("number of octaves must be positive"));
        }
        if self.scales_per_octave == 0 {
            return Err(Error::InvalidConfig("scales per octave must be positive"));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be positive"));
        }
        if !positive(self.min_blur_level) || !positive(self.min_interpixel_distance) {
            return Err(Error::InvalidConfig(
                "blur level and interpixel distance must be positive",
            ));
        }
        if !(self.assumed_blur.is_finite() && self.assumed_blur >= 0.0) {
            return Err(Error::InvalidConfig("assumed blur must be non-negative"));
        }
        if self.min_blur_level <= self.assumed_blur {
            return Err(Error::InvalidConfig(
                "minimum blur level must exceed the assumed blur",
            ));
        }
        if !positive(self.contrast_threshold)
            || !positive(self.detection_threshold_factor)
            || !positive(self.edge_threshold)
            || !positive(self.max_offset)
        {
            return Err(Error::InvalidConfig("thresholds must be positive"));
        }
        if self.max_refinement_iterations == 0 {
            return Err(Error::InvalidConfig(
                "at least one refinement iteration is required",
            ));
        }
        Ok(())
    }

    /// Ratio between consecutive blur levels, `2^(1/scales_per_octave)`.
    pub fn scale_factor(&self) -> f64 {
        2f64.powf((self.scales_per_octave as f64).recip())
    }

    /// The contrast threshold adjusted for `scales_per_octave`.
    pub fn contrast_threshold_for_scales(&self) -> f64 {
        let reference = 2f64.powf(1.0 / 3.0) - 1.0;
        (self.scale_factor() - 1.0) / reference * self.contrast_threshold
    }

    /// Threshold a raw DoG extremum must reach to become a candidate.
    pub fn detection_threshold(&self) -> f64 {
        self.detection_threshold_factor * self.contrast_threshold_for_scales()
    }

    /// `(c_edge + 1)^2 / c_edge`
    pub fn edge_response_threshold(&self) -> f64 {
        (self.edge_threshold + 1.0).powi(2) / self.edge_threshold
    }

    /// The most octaves an input of this size supports while the coarsest
    /// octave still has an interior pixel.
    pub fn max_octaves_for(width: usize, height: usize) -> usize {
        let mut side = 2 * width.min(height);
        let mut octaves = 0;
        while side >= 3 {
            octaves += 1;
            side /= 2;
        }
        octaves
    }

    /// Extract keypoints using all four stages.
    ///
    /// # Example
    /// ```
    /// let image = cv_sift::GrayFloatImage::from_fn(32, 32, |x, y| {
    ///     if (12..20).contains(&x) && (12..20).contains(&y) { 1.0 } else { 0.0 }
    /// });
    /// let keypoints = cv_sift::Sift::new(2, 3).extract_from_gray_float_image(&image).unwrap();
    /// for kp in &keypoints {
    ///     assert!(kp.absolute_sigma > 0.0);
    /// }
    /// ```
    pub fn extract_from_gray_float_image(
        &self,
        image: &GrayFloatImage,
    ) -> Result<Vec<RefinedKeypoint>> {
        let mut pipeline = Pipeline::new(*self);
        pipeline.run(image.clone())?;
        Ok(pipeline
            .into_state()
            .refinement
            .map(|refinement| refinement.keypoints)
            .unwrap_or_default())
    }

    /// Convert to unit float grayscale and extract keypoints.
    pub fn extract(&self, image: &DynamicImage) -> Result<Vec<RefinedKeypoint>> {
        self.extract_from_gray_float_image(&GrayFloatImage::from_dynamic(image))
    }
}
