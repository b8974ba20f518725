use crate::chunks::{map_tiles, partition};
use crate::image::{blur_tile, gaussian_kernel, GrayFloatImage};
use crate::pipeline::CancelToken;
use crate::progress::{NoProgress, ProgressEvent, ProgressSink};
use crate::{Error, Result, Sift};
use derive_more::Deref;
use log::*;

/// One image of the pyramid and the total Gaussian blur it carries, in the
/// pixel units of its octave's seed.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleLevel {
    pub blur_level: f64,
    pub image: GrayFloatImage,
}

/// Equally sized images ordered by increasing blur.
#[derive(Debug, Clone, PartialEq, Default, Deref)]
pub struct Octave {
    pub levels: Vec<ScaleLevel>,
}

impl Octave {
    /// `(width, height)` shared by every level.
    pub fn dimensions(&self) -> (usize, usize) {
        self.levels
            .first()
            .map(|level| level.image.dimensions())
            .unwrap_or((0, 0))
    }

    pub fn image(&self, scale: usize) -> &GrayFloatImage {
        &self.levels[scale].image
    }

    pub(crate) fn check_levels(&self, octave: usize) -> std::result::Result<(), String> {
        let dims = self.dimensions();
        for (scale, pair) in self.levels.windows(2).enumerate() {
            if pair[1].blur_level <= pair[0].blur_level {
                return Err(format!(
                    "octave {octave}: blur level {} at scale {} does not exceed {}",
                    pair[1].blur_level,
                    scale + 1,
                    pair[0].blur_level
                ));
            }
        }
        if let Some(scale) = self
            .levels
            .iter()
            .position(|level| level.image.dimensions() != dims)
        {
            return Err(format!(
                "octave {octave}: scale {scale} is {:?}, expected {dims:?}",
                self.levels[scale].image.dimensions()
            ));
        }
        Ok(())
    }
}

/// The Gaussian pyramid. Octave `0` is sampled at twice the input
/// resolution and every following octave halves it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleSpace {
    pub octaves: Vec<Octave>,
    pub scales_per_octave: usize,
}

impl ScaleSpace {
    /// Number of Gaussian levels every octave must hold.
    pub fn levels_per_octave(&self) -> usize {
        self.scales_per_octave + 3
    }

    /// Check the structure downstream stages rely on.
    pub fn validate(&self) -> Result<()> {
        let malformed = Error::MalformedScaleSpace;
        if self.octaves.is_empty() {
            return Err(malformed("no octaves".into()));
        }
        let mut previous: Option<(usize, usize)> = None;
        for (index, octave) in self.octaves.iter().enumerate() {
            if octave.len() != self.levels_per_octave() {
                return Err(malformed(format!(
                    "octave {index} has {} levels, expected {}",
                    octave.len(),
                    self.levels_per_octave()
                )));
            }
            octave.check_levels(index).map_err(malformed)?;
            let dims = octave.dimensions();
            if let Some((width, height)) = previous {
                if dims != (width / 2, height / 2) {
                    return Err(malformed(format!(
                        "octave {index} is {dims:?}, expected half of {:?}",
                        (width, height)
                    )));
                }
            }
            previous = Some(dims);
        }
        Ok(())
    }
}

impl Sift {
    /// Build the scale space without progress reporting or cancellation.
    pub fn scale_space(&self, image: &GrayFloatImage) -> Result<ScaleSpace> {
        self.build_scale_space(image, &NoProgress, &CancelToken::new())
    }

    /// Build the Gaussian scale space of `image`.
    ///
    /// The input is upsampled by 2 and blurred from `assumed_blur` to
    /// `min_blur_level`. Each following level blurs the previous one so that
    /// level `s` of an octave whose first level has blur `b` carries
    /// `b * 2^(s / scales_per_octave)`. The first level of octave `o > 0` is
    /// level `scales_per_octave` of octave `o - 1` downsampled by 2, which
    /// has exactly twice the blur of that octave's first level.
    ///
    /// # Arguments
    /// * `image` - The input image.
    /// * `progress` - Receives an event per blurred tile and image.
    /// * `cancel` - Checked before every tile.
    pub fn build_scale_space(
        &self,
        image: &GrayFloatImage,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ScaleSpace> {
        self.validate()?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::EmptyImage);
        }
        let max = Sift::max_octaves_for(width, height);
        if self.num_octaves > max {
            return Err(Error::TooManyOctaves {
                requested: self.num_octaves,
                max,
            });
        }
        let levels_per_octave = self.scales_per_octave + 3;
        let k = self.scale_factor();
        let mut octaves: Vec<Octave> = Vec::with_capacity(self.num_octaves);
        for octave in 0..self.num_octaves {
            let mut levels = Vec::with_capacity(levels_per_octave);
            if octave == 0 {
                trace!("Upsampling the {width}x{height} input.");
                let base = image.double_size();
                let blurred = self.blur_to(
                    &base,
                    (octave, 0),
                    self.assumed_blur,
                    self.min_blur_level,
                    progress,
                    cancel,
                )?;
                levels.push(ScaleLevel {
                    blur_level: self.min_blur_level,
                    image: blurred,
                });
            } else {
                let seed = &octaves[octave - 1].levels[self.scales_per_octave];
                let image = seed.image.half_size();
                trace!(
                    "Seeded octave {} at {}x{} with blur {}.",
                    octave,
                    image.width(),
                    image.height(),
                    seed.blur_level
                );
                progress.notify(ProgressEvent::BlurredImage {
                    octave,
                    scale: 0,
                    blur_level: seed.blur_level,
                });
                levels.push(ScaleLevel {
                    blur_level: seed.blur_level,
                    image,
                });
            }
            let octave_blur = levels[0].blur_level;
            for scale in 1..levels_per_octave {
                let base_blur = levels[scale - 1].blur_level;
                let target = octave_blur * k.powi(scale as i32);
                let blurred = self.blur_to(
                    &levels[scale - 1].image,
                    (octave, scale),
                    base_blur,
                    target,
                    progress,
                    cancel,
                )?;
                levels.push(ScaleLevel {
                    blur_level: target,
                    image: blurred,
                });
            }
            let octave = Octave { levels };
            debug!(
                "Octave {} is {:?} with blur levels {:?}.",
                octaves.len(),
                octave.dimensions(),
                octave.iter().map(|l| l.blur_level).collect::<Vec<_>>()
            );
            octaves.push(octave);
        }
        Ok(ScaleSpace {
            octaves,
            scales_per_octave: self.scales_per_octave,
        })
    }

    /// Blur `source`, which carries `base` blur, until it carries `target`.
    fn blur_to(
        &self,
        source: &GrayFloatImage,
        (octave, scale): (usize, usize),
        base: f64,
        target: f64,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<GrayFloatImage> {
        // Also rejects NaN.
        if !(target > base) {
            return Err(Error::NonIncreasingSigma {
                octave,
                scale,
                target,
                base,
            });
        }
        let offset = (target * target - base * base).sqrt();
        let kernel = gaussian_kernel(offset);
        let (width, height) = source.dimensions();
        let boundaries = partition(width, height, self.chunk_size)?;
        let tiles = map_tiles(&boundaries, cancel, |boundary| {
            blur_tile(source, &kernel, boundary)
        })?;
        let mut output = GrayFloatImage::new(width, height);
        for (boundary, tile) in boundaries.iter().zip(tiles) {
            output.write_tile(boundary, &tile);
            progress.notify(ProgressEvent::BlurredChunk {
                octave,
                scale,
                boundary: *boundary,
            });
        }
        trace!(
            "Blurred octave {octave} scale {scale} by {offset} over {} tiles.",
            boundaries.len()
        );
        progress.notify(ProgressEvent::BlurredImage {
            octave,
            scale,
            blur_level: target,
        });
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blur(target: f64) -> Result<GrayFloatImage> {
        let image = GrayFloatImage::from_fn(8, 8, |x, y| ((x + y) % 3) as f32);
        Sift::default().blur_to(&image, (0, 1), 1.0, target, &NoProgress, &CancelToken::new())
    }

    #[test]
    fn blur_to_a_larger_sigma_succeeds() {
        assert_eq!(blur(1.5).unwrap().dimensions(), (8, 8));
    }

    #[test]
    fn equal_or_smaller_sigma_is_non_increasing() {
        for target in [1.0, 0.5] {
            match blur(target) {
                Err(Error::NonIncreasingSigma {
                    octave: 0,
                    scale: 1,
                    target: t,
                    base,
                }) => {
                    assert_eq!(t, target);
                    assert_eq!(base, 1.0);
                }
                other => panic!("expected NonIncreasingSigma, got {other:?}"),
            }
        }
    }

    #[test]
    fn nan_sigma_is_non_increasing() {
        assert!(matches!(
            blur(f64::NAN),
            Err(Error::NonIncreasingSigma { .. })
        ));
    }

    #[test]
    fn rejected_blur_emits_no_progress() {
        let image = GrayFloatImage::new(4, 4);
        let events = std::cell::RefCell::new(0);
        let sink = |_: ProgressEvent| *events.borrow_mut() += 1;
        let result = Sift::default().blur_to(&image, (0, 0), 2.0, 1.0, &sink, &CancelToken::new());
        assert!(result.is_err());
        assert_eq!(events.into_inner(), 0);
    }
}
