use crate::dog::DifferenceOfGaussians;
use crate::image::GrayFloatImage;
use crate::pipeline::CancelToken;
use crate::progress::{NoProgress, ProgressEvent, ProgressSink};
use crate::{Error, Result, Sift};
use log::*;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// A pixel of a DoG image that is strictly above or below all 26 of its
/// neighbors.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extremum {
    pub x: usize,
    pub y: usize,
    /// The DoG response at `(x, y)`.
    pub value: f32,
}

/// Extrema of one DoG triplet split by the detection threshold.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Detection {
    pub candidates: Vec<Extremum>,
    /// Extrema below the threshold, kept only for diagnostics.
    pub rejected: Vec<Extremum>,
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleCandidates {
    /// Index of the center image within its DoG octave.
    pub scale_level: usize,
    pub candidates: Vec<Extremum>,
    pub rejected: Vec<Extremum>,
}

/// Candidates of every interior DoG level, indexed by octave.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Candidates {
    pub octaves: Vec<Vec<ScaleCandidates>>,
}

impl Candidates {
    /// Total candidates passed on to refinement.
    pub fn len(&self) -> usize {
        self.octaves
            .iter()
            .flatten()
            .map(|scale| scale.candidates.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rejected_len(&self) -> usize {
        self.octaves
            .iter()
            .flatten()
            .map(|scale| scale.rejected.len())
            .sum()
    }

    /// Check that every candidate can be refined against `dog`.
    pub fn validate(&self, dog: &DifferenceOfGaussians) -> Result<()> {
        let malformed = Error::MalformedCandidates;
        if self.octaves.len() != dog.octaves.len() {
            return Err(malformed(format!(
                "{} candidate octaves for {} DoG octaves",
                self.octaves.len(),
                dog.octaves.len()
            )));
        }
        for (index, (scales, octave)) in self.octaves.iter().zip(&dog.octaves).enumerate() {
            let (width, height) = octave.dimensions();
            for scale in scales {
                if scale.scale_level == 0 || scale.scale_level + 1 >= octave.len() {
                    return Err(malformed(format!(
                        "octave {index}: scale level {} is not interior to {} levels",
                        scale.scale_level,
                        octave.len()
                    )));
                }
                let interior = |e: &Extremum| {
                    e.x >= 1 && e.y >= 1 && e.x + 1 < width && e.y + 1 < height
                };
                if let Some(e) = scale.candidates.iter().find(|e| !interior(*e)) {
                    return Err(malformed(format!(
                        "octave {index}: candidate ({}, {}) is outside the {}x{} interior",
                        e.x, e.y, width, height
                    )));
                }
            }
        }
        Ok(())
    }
}

/// `true` when the center pixel `(x, y)` of `triplet[1]` is strictly greater
/// or strictly less than all 26 neighbors.
fn is_extremum(triplet: [&GrayFloatImage; 3], x: usize, y: usize) -> bool {
    let value = triplet[1].get(x, y);
    let mut maximum = true;
    let mut minimum = true;
    for (layer, image) in triplet.iter().enumerate() {
        for ny in y - 1..=y + 1 {
            let row = &image.row(ny)[x - 1..=x + 1];
            for (nx, &neighbor) in (x - 1..=x + 1).zip(row) {
                if layer == 1 && nx == x && ny == y {
                    continue;
                }
                maximum &= value > neighbor;
                minimum &= value < neighbor;
            }
        }
        if !maximum && !minimum {
            return false;
        }
    }
    maximum || minimum
}

/// Scan the interior of `triplet[1]` for extrema. Pixels with
/// `|value| >= threshold` become candidates and the rest are rejected.
/// Both lists are in row-major order.
pub fn find_extrema(triplet: [&GrayFloatImage; 3], threshold: f64) -> Result<Detection> {
    let dims = triplet[1].dimensions();
    if triplet.iter().any(|image| image.dimensions() != dims) {
        return Err(Error::MalformedDog(format!(
            "triplet dimensions differ: {:?}",
            triplet.map(|image| image.dimensions())
        )));
    }
    let (width, height) = dims;
    if width < 3 || height < 3 {
        return Ok(Detection::default());
    }
    let scan_row = |y: usize| {
        (1..width - 1)
            .filter(|&x| is_extremum(triplet, x, y))
            .map(|x| Extremum {
                x,
                y,
                value: triplet[1].get(x, y),
            })
            .collect::<Vec<_>>()
    };
    #[cfg(feature = "rayon")]
    let rows: Vec<Vec<Extremum>> = (1..height - 1).into_par_iter().map(scan_row).collect();
    #[cfg(not(feature = "rayon"))]
    let rows: Vec<Vec<Extremum>> = (1..height - 1).map(scan_row).collect();
    let (candidates, rejected): (Vec<_>, Vec<_>) = rows
        .into_iter()
        .flatten()
        .partition(|e| (e.value as f64).abs() >= threshold);
    Ok(Detection {
        candidates,
        rejected,
    })
}

impl Sift {
    /// Find extrema of one triplet with the scaled detection threshold.
    pub fn detect_extrema(&self, triplet: [&GrayFloatImage; 3]) -> Result<Detection> {
        find_extrema(triplet, self.detection_threshold())
    }

    /// Find candidates without progress reporting or cancellation.
    pub fn candidates(&self, dog: &DifferenceOfGaussians) -> Result<Candidates> {
        self.find_candidates(dog, &NoProgress, &CancelToken::new())
    }

    /// Scan every triplet of adjacent DoG levels in every octave.
    ///
    /// A marker event is emitted per extremum, candidates first, with
    /// `low_contrast` set on rejected ones.
    pub fn find_candidates(
        &self,
        dog: &DifferenceOfGaussians,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Candidates> {
        self.validate()?;
        dog.validate()?;
        let threshold = self.detection_threshold();
        let mut octaves = Vec::with_capacity(dog.octaves.len());
        for (octave, levels) in dog.octaves.iter().enumerate() {
            let mut scales = Vec::with_capacity(levels.len() - 2);
            for scale_level in 1..levels.len() - 1 {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let triplet = [
                    levels.image(scale_level - 1),
                    levels.image(scale_level),
                    levels.image(scale_level + 1),
                ];
                let Detection {
                    candidates,
                    rejected,
                } = find_extrema(triplet, threshold)?;
                let markers = candidates
                    .iter()
                    .map(|e| (e, false))
                    .chain(rejected.iter().map(|e| (e, true)));
                for (e, low_contrast) in markers {
                    progress.notify(ProgressEvent::CandidateMarker {
                        octave,
                        scale: scale_level,
                        x: e.x,
                        y: e.y,
                        low_contrast,
                    });
                }
                trace!(
                    "Octave {octave} scale {scale_level}: {} candidates, {} rejected.",
                    candidates.len(),
                    rejected.len()
                );
                scales.push(ScaleCandidates {
                    scale_level,
                    candidates,
                    rejected,
                });
            }
            debug!(
                "Octave {} has {} candidates and {} low contrast extrema.",
                octave,
                scales.iter().map(|s| s.candidates.len()).sum::<usize>(),
                scales.iter().map(|s| s.rejected.len()).sum::<usize>()
            );
            octaves.push(scales);
        }
        Ok(Candidates { octaves })
    }
}
