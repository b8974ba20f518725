use crate::chunks::{map_tiles, partition, ChunkBoundary};
use crate::image::GrayFloatImage;
use crate::pipeline::CancelToken;
use crate::progress::{NoProgress, ProgressEvent, ProgressSink};
use crate::scale_space::{Octave, ScaleLevel, ScaleSpace};
use crate::{Error, Result, Sift};
use log::*;
use ndarray::s;

/// Differences of adjacent Gaussian levels, `scales_per_octave + 2` per
/// octave. Level `i` carries the blur level of Gaussian level `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceOfGaussians {
    pub octaves: Vec<Octave>,
    pub scales_per_octave: usize,
}

impl DifferenceOfGaussians {
    pub fn levels_per_octave(&self) -> usize {
        self.scales_per_octave + 2
    }

    /// Check the structure the extrema detector and refiner index into.
    pub fn validate(&self) -> Result<()> {
        let malformed = Error::MalformedDog;
        if self.octaves.is_empty() {
            return Err(malformed("no octaves".into()));
        }
        for (index, octave) in self.octaves.iter().enumerate() {
            if octave.len() != self.levels_per_octave() || octave.len() < 3 {
                return Err(malformed(format!(
                    "octave {index} has {} levels, expected {}",
                    octave.len(),
                    self.levels_per_octave()
                )));
            }
            octave.check_levels(index).map_err(malformed)?;
        }
        Ok(())
    }
}

/// `upper - lower` over one tile, row-major within the tile.
fn subtract_tile(
    upper: &GrayFloatImage,
    lower: &GrayFloatImage,
    boundary: &ChunkBoundary,
) -> Vec<f32> {
    let (x1, x2, y1, y2) = (boundary.x1, boundary.x2, boundary.y1, boundary.y2);
    let upper = upper.ref_array2().slice_move(s![y1..y2, x1..x2]);
    let lower = lower.ref_array2().slice_move(s![y1..y2, x1..x2]);
    upper.iter().zip(lower.iter()).map(|(u, l)| u - l).collect()
}

impl Sift {
    /// Build the difference of Gaussians without progress or cancellation.
    pub fn dog(&self, scale_space: &ScaleSpace) -> Result<DifferenceOfGaussians> {
        self.build_dog(scale_space, &NoProgress, &CancelToken::new())
    }

    /// Subtract every pair of adjacent levels of `scale_space`, tile by tile.
    pub fn build_dog(
        &self,
        scale_space: &ScaleSpace,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<DifferenceOfGaussians> {
        self.validate()?;
        scale_space.validate()?;
        let mut octaves = Vec::with_capacity(scale_space.octaves.len());
        for (octave, gaussians) in scale_space.octaves.iter().enumerate() {
            let (width, height) = gaussians.dimensions();
            let boundaries = partition(width, height, self.chunk_size)?;
            let mut levels = Vec::with_capacity(gaussians.len() - 1);
            for (scale, pair) in gaussians.windows(2).enumerate() {
                let (lower, upper) = (&pair[0], &pair[1]);
                let tiles = map_tiles(&boundaries, cancel, |boundary| {
                    subtract_tile(&upper.image, &lower.image, boundary)
                })?;
                let mut image = GrayFloatImage::new(width, height);
                for (boundary, tile) in boundaries.iter().zip(tiles) {
                    image.write_tile(boundary, &tile);
                    progress.notify(ProgressEvent::DogChunk {
                        octave,
                        scale,
                        boundary: *boundary,
                    });
                }
                progress.notify(ProgressEvent::DogImage { octave, scale });
                trace!("Subtracted octave {octave} levels {scale} and {}.", scale + 1);
                levels.push(ScaleLevel {
                    blur_level: lower.blur_level,
                    image,
                });
            }
            debug!(
                "Octave {} has {} difference images of {}x{}.",
                octave,
                levels.len(),
                width,
                height
            );
            octaves.push(Octave { levels });
        }
        Ok(DifferenceOfGaussians {
            octaves,
            scales_per_octave: scale_space.scales_per_octave,
        })
    }
}
