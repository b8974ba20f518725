use crate::dog::DifferenceOfGaussians;
use crate::extrema::{Candidates, Extremum};
use crate::matrix::{
    determinant2, dot, minor_matrix, mul_vector, trace2, Cofactor, Invert3, Matrix3, Vector3,
};
use crate::pipeline::CancelToken;
use crate::progress::{NoProgress, ProgressEvent, ProgressSink};
use crate::scale_space::Octave;
use crate::{Error, Result, Sift};
use log::*;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// A keypoint located to sub-pixel and sub-scale precision.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RefinedKeypoint {
    pub octave: usize,
    /// DoG level the fit converged at, always interior to the octave.
    pub scale_level: usize,
    /// Column of the sample the fit converged at, in the octave grid.
    pub local_x: usize,
    /// Row of the sample the fit converged at, in the octave grid.
    pub local_y: usize,
    /// `local_x` plus the fitted offset.
    pub subpixel_x: f64,
    /// `local_y` plus the fitted offset.
    pub subpixel_y: f64,
    /// Column in input image pixels.
    pub absolute_x: f64,
    /// Row in input image pixels.
    pub absolute_y: f64,
    /// Blur level in input image pixels.
    pub absolute_sigma: f64,
    /// The quadratic model evaluated at its extremum.
    pub interpolated_value: f64,
    /// Number of quadratic fits it took to converge.
    pub iterations: usize,
}

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Discard {
    /// Re-centering left the interior of the DoG octave.
    OutOfBounds,
    /// `|interpolated value|` is below the contrast threshold.
    LowContrast,
    /// `tr(H)^2 / det(H)` of the spatial Hessian exceeds the edge threshold.
    Edge,
    /// The Hessian was singular or the iteration budget ran out.
    NoConvergence,
}

/// The terminal state of one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome {
    Converged(RefinedKeypoint),
    Discarded(Discard),
}

impl Outcome {
    pub fn keypoint(&self) -> Option<&RefinedKeypoint> {
        match self {
            Outcome::Converged(keypoint) => Some(keypoint),
            Outcome::Discarded(_) => None,
        }
    }

    pub fn discard(&self) -> Option<Discard> {
        match *self {
            Outcome::Converged(_) => None,
            Outcome::Discarded(discard) => Some(discard),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscardCounts {
    pub out_of_bounds: usize,
    pub low_contrast: usize,
    pub edge: usize,
    pub no_convergence: usize,
}

impl DiscardCounts {
    pub fn record(&mut self, discard: Discard) {
        match discard {
            Discard::OutOfBounds => self.out_of_bounds += 1,
            Discard::LowContrast => self.low_contrast += 1,
            Discard::Edge => self.edge += 1,
            Discard::NoConvergence => self.no_convergence += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.out_of_bounds + self.low_contrast + self.edge + self.no_convergence
    }
}

/// The result of refining every candidate.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Refinement {
    pub keypoints: Vec<RefinedKeypoint>,
    pub discards: DiscardCounts,
}

/// DoG value at scale `s`, row `m`, column `n`.
fn sample(octave: &Octave, s: usize, m: usize, n: usize) -> f64 {
    f64::from(octave.image(s).get(n, m))
}

/// Central difference gradient of the DoG at `(s, m, n)`, ordered
/// `(scale, row, column)`.
pub fn gradient(octave: &Octave, s: usize, m: usize, n: usize) -> Vector3 {
    let d = |s, m, n| sample(octave, s, m, n);
    [
        (d(s + 1, m, n) - d(s - 1, m, n)) / 2.0,
        (d(s, m + 1, n) - d(s, m - 1, n)) / 2.0,
        (d(s, m, n + 1) - d(s, m, n - 1)) / 2.0,
    ]
}

/// Finite difference Hessian of the DoG at `(s, m, n)`, ordered like
/// [`gradient`].
pub fn hessian(octave: &Octave, s: usize, m: usize, n: usize) -> Matrix3 {
    let d = |s, m, n| sample(octave, s, m, n);
    let center2 = 2.0 * d(s, m, n);
    let h11 = d(s + 1, m, n) + d(s - 1, m, n) - center2;
    let h22 = d(s, m + 1, n) + d(s, m - 1, n) - center2;
    let h33 = d(s, m, n + 1) + d(s, m, n - 1) - center2;
    let h12 = (d(s + 1, m + 1, n) - d(s + 1, m - 1, n) - d(s - 1, m + 1, n)
        + d(s - 1, m - 1, n))
        / 4.0;
    let h13 = (d(s + 1, m, n + 1) - d(s + 1, m, n - 1) - d(s - 1, m, n + 1)
        + d(s - 1, m, n - 1))
        / 4.0;
    let h23 = (d(s, m + 1, n + 1) - d(s, m + 1, n - 1) - d(s, m - 1, n + 1)
        + d(s, m - 1, n - 1))
        / 4.0;
    [[h11, h12, h13], [h12, h22, h23], [h13, h23, h33]]
}

impl Sift {
    /// Refine one candidate found at DoG level `scale_level` of `octave`
    /// with the cofactor inverse.
    pub fn refine_candidate(
        &self,
        levels: &Octave,
        octave: usize,
        scale_level: usize,
        candidate: &Extremum,
    ) -> Outcome {
        self.refine_candidate_with(&Cofactor, levels, octave, scale_level, candidate)
    }

    /// Iterate quadratic fits around the candidate until the offset is small,
    /// the sample leaves the interior, or the iteration budget runs out.
    ///
    /// `levels` must hold at least three DoG images and the candidate must
    /// be interior to them.
    pub fn refine_candidate_with<I: Invert3>(
        &self,
        inverter: &I,
        levels: &Octave,
        octave: usize,
        scale_level: usize,
        candidate: &Extremum,
    ) -> Outcome {
        let (width, height) = levels.dimensions();
        let (mut s, mut m, mut n) = (scale_level, candidate.y, candidate.x);
        for iteration in 1..=self.max_refinement_iterations {
            let g = gradient(levels, s, m, n);
            let h = hessian(levels, s, m, n);
            let inverse = match inverter.invert(&h) {
                Some(inverse) => inverse,
                None => return Outcome::Discarded(Discard::NoConvergence),
            };
            let alpha = mul_vector(&inverse, &g).map(|v| -v);
            if alpha.iter().any(|a| !a.is_finite()) {
                return Outcome::Discarded(Discard::NoConvergence);
            }
            if alpha.iter().all(|a| a.abs() < self.max_offset) {
                return self.accept(levels, octave, (s, m, n), &alpha, &g, &h, iteration);
            }
            let recentered = [
                s as f64 + alpha[0],
                m as f64 + alpha[1],
                n as f64 + alpha[2],
            ]
            .map(f64::round);
            let inside = |v: f64, len: usize| v >= 1.0 && v + 2.0 <= len as f64;
            if !(inside(recentered[0], levels.len())
                && inside(recentered[1], height)
                && inside(recentered[2], width))
            {
                return Outcome::Discarded(Discard::OutOfBounds);
            }
            s = recentered[0] as usize;
            m = recentered[1] as usize;
            n = recentered[2] as usize;
        }
        Outcome::Discarded(Discard::NoConvergence)
    }

    /// Contrast and edge tests on a converged fit.
    #[allow(clippy::too_many_arguments)]
    fn accept(
        &self,
        levels: &Octave,
        octave: usize,
        (s, m, n): (usize, usize, usize),
        alpha: &Vector3,
        g: &Vector3,
        h: &Matrix3,
        iterations: usize,
    ) -> Outcome {
        let interpolated_value = sample(levels, s, m, n) + 0.5 * dot(alpha, g);
        if interpolated_value.abs() < self.contrast_threshold_for_scales() {
            return Outcome::Discarded(Discard::LowContrast);
        }
        // Spatial block of the Hessian, without the scale row and column.
        let spatial = minor_matrix(h, 0, 0);
        let det = determinant2(&spatial);
        let trace = trace2(&spatial);
        if trace * trace / det > self.edge_response_threshold() {
            return Outcome::Discarded(Discard::Edge);
        }
        let interpixel_distance = self.min_interpixel_distance * 2f64.powi(octave as i32);
        let subpixel_x = n as f64 + alpha[2];
        let subpixel_y = m as f64 + alpha[1];
        let scale = (s as f64 + alpha[0]) / self.scales_per_octave as f64;
        Outcome::Converged(RefinedKeypoint {
            octave,
            scale_level: s,
            local_x: n,
            local_y: m,
            subpixel_x,
            subpixel_y,
            absolute_x: interpixel_distance * subpixel_x,
            absolute_y: interpixel_distance * subpixel_y,
            absolute_sigma: interpixel_distance / self.min_interpixel_distance
                * self.min_blur_level
                * 2f64.powf(scale),
            interpolated_value,
            iterations,
        })
    }

    /// Refine every candidate without progress reporting or cancellation.
    pub fn refinement(
        &self,
        dog: &DifferenceOfGaussians,
        candidates: &Candidates,
    ) -> Result<Refinement> {
        self.refine(dog, candidates, &NoProgress, &CancelToken::new())
    }

    /// Refine every candidate with the cofactor inverse.
    pub fn refine(
        &self,
        dog: &DifferenceOfGaussians,
        candidates: &Candidates,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Refinement> {
        self.refine_with(&Cofactor, dog, candidates, progress, cancel)
    }

    /// Refine every candidate, one `Refined` event each. Keypoints keep the
    /// order of the candidates they came from.
    pub fn refine_with<I: Invert3 + Sync>(
        &self,
        inverter: &I,
        dog: &DifferenceOfGaussians,
        candidates: &Candidates,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Refinement> {
        self.validate()?;
        dog.validate()?;
        candidates.validate(dog)?;
        let mut refinement = Refinement::default();
        let octaves = candidates.octaves.iter().zip(&dog.octaves);
        for (octave, (scales, levels)) in octaves.enumerate() {
            let before = refinement.keypoints.len();
            for scale in scales {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let scale_level = scale.scale_level;
                let refine = |candidate: &Extremum| {
                    self.refine_candidate_with(inverter, levels, octave, scale_level, candidate)
                };
                #[cfg(feature = "rayon")]
                let outcomes: Vec<Outcome> = scale.candidates.par_iter().map(refine).collect();
                #[cfg(not(feature = "rayon"))]
                let outcomes: Vec<Outcome> = scale.candidates.iter().map(refine).collect();
                for outcome in outcomes {
                    progress.notify(ProgressEvent::Refined {
                        octave,
                        scale: scale.scale_level,
                        discard: outcome.discard(),
                    });
                    match outcome {
                        Outcome::Converged(keypoint) => refinement.keypoints.push(keypoint),
                        Outcome::Discarded(discard) => refinement.discards.record(discard),
                    }
                }
            }
            debug!(
                "Octave {} kept {} keypoints, discards so far {:?}.",
                octave,
                refinement.keypoints.len() - before,
                refinement.discards
            );
        }
        info!(
            "Refined {} keypoints from {} candidates.",
            refinement.keypoints.len(),
            candidates.len()
        );
        Ok(refinement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::GrayFloatImage;
    use crate::scale_space::ScaleLevel;

    fn octave(f: impl Fn(usize, usize, usize) -> f32) -> Octave {
        Octave {
            levels: (0..5)
                .map(|s| ScaleLevel {
                    blur_level: 1.0 + s as f64,
                    image: GrayFloatImage::from_fn(7, 7, |n, m| f(s, m, n)),
                })
                .collect(),
        }
    }

    #[test]
    fn quadratic_has_exact_derivatives() {
        let levels = octave(|s, m, n| {
            let (s, m, n) = (s as f32, m as f32, n as f32);
            s * s + 2.0 * m * n - 3.0 * n * n + s * m
        });
        assert_eq!(gradient(&levels, 2, 3, 3), [7.0, 8.0, -12.0]);
        assert_eq!(
            hessian(&levels, 2, 3, 3),
            [[2.0, 1.0, 0.0], [1.0, 0.0, 2.0], [0.0, 2.0, -6.0]]
        );
    }

    #[test]
    fn discard_counts_total() {
        let mut counts = DiscardCounts::default();
        counts.record(Discard::Edge);
        counts.record(Discard::Edge);
        counts.record(Discard::OutOfBounds);
        assert_eq!(counts.edge, 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn singular_hessian_does_not_converge() {
        let levels = octave(|_, m, n| 0.25 * (m as f32 - 3.0) * (n as f32 - 3.0));
        let candidate = Extremum {
            x: 3,
            y: 3,
            value: 0.0,
        };
        assert_eq!(
            Sift::default().refine_candidate(&levels, 0, 2, &candidate),
            Outcome::Discarded(Discard::NoConvergence)
        );
    }
}
