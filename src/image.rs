use crate::chunks::ChunkBoundary;
use derive_more::{Deref, DerefMut};
use image::{DynamicImage, ImageBuffer, Luma};
use log::*;
use ndarray::ArrayView2;
use std::f32;
use wide::f32x4;

type GrayImageBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Single channel float image. Every stage of the pipeline reads and produces
/// these, stored row-major.
///
/// Loading and color conversion stay with the image crate; this type only
/// adds the sampling, resampling and tiled filtering the pyramid needs.
#[derive(Debug, Clone, PartialEq, Deref, DerefMut)]
pub struct GrayFloatImage(pub GrayImageBuffer);

impl GrayFloatImage {
    /// Create a unit float image from the image crate's DynamicImage type.
    ///
    /// # Arguments
    /// * `input_image` - the input image.
    /// # Return value
    /// An image with pixel values between 0 and 1.
    pub fn from_dynamic(input_image: &DynamicImage) -> Self {
        info!(
            "Loaded a {} x {} image",
            input_image.width(),
            input_image.height()
        );
        Self(input_image.to_luma32f())
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        Self(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([f(x as usize, y as usize)])
        }))
    }

    pub fn ref_array2(&self) -> ArrayView2<f32> {
        ArrayView2::from_shape((self.height(), self.width()), self.0.as_raw())
            .expect("image buffer is always height * width")
    }

    pub fn width(&self) -> usize {
        self.0.width() as usize
    }

    pub fn height(&self) -> usize {
        self.0.height() as usize
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn new(width: usize, height: usize) -> Self {
        Self(ImageBuffer::from_pixel(
            width as u32,
            height as u32,
            Luma([0.0]),
        ))
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.0.as_raw()[y * self.width() + x]
    }

    pub fn put(&mut self, x: usize, y: usize, pixel_value: f32) {
        self.put_pixel(x as u32, y as u32, Luma([pixel_value]));
    }

    /// Row `y` as a slice.
    pub fn row(&self, y: usize) -> &[f32] {
        let width = self.width();
        &self.0.as_raw()[y * width..(y + 1) * width]
    }

    /// Nearest neighbor upsampling by 2. Each pixel becomes a 2x2 block.
    pub fn double_size(&self) -> Self {
        Self::from_fn(self.width() * 2, self.height() * 2, |x, y| {
            self.get(x / 2, y / 2)
        })
    }

    /// Nearest neighbor downsampling by 2, keeping the even rows and columns.
    /// Odd dimensions are floored.
    pub fn half_size(&self) -> Self {
        Self::from_fn(self.width() / 2, self.height() / 2, |x, y| {
            self.get(x * 2, y * 2)
        })
    }

    /// Copy a tile produced by [`blur_tile`] or a pixelwise tile operation
    /// into its rectangle. `tile` is row-major with the boundary's width.
    pub fn write_tile(&mut self, boundary: &ChunkBoundary, tile: &[f32]) {
        let tile_width = boundary.width();
        debug_assert_eq!(tile.len(), boundary.area());
        let width = self.width();
        let buffer: &mut [f32] = &mut self.0;
        for (row, src) in (boundary.y1..boundary.y2).zip(tile.chunks_exact(tile_width)) {
            let start = row * width + boundary.x1;
            buffer[start..start + tile_width].copy_from_slice(src);
        }
    }
}

/// The Gaussian function.
///
/// # Arguments
/// * `x` - the offset.
/// * `r` - sigma.
/// # Return value
/// The kernel value at x.
fn gaussian(x: f32, r: f32) -> f32 {
    ((2.0 * f32::consts::PI).sqrt() * r).recip() * (-x.powi(2) / (2.0 * r.powi(2))).exp()
}

/// Kernel length covering three standard deviations on each side.
pub fn kernel_size_for_sigma(sigma: f64) -> usize {
    2 * (3.0 * sigma).round() as usize + 1
}

/// Generate a normalized 1D Gaussian kernel of `kernel_size_for_sigma(r)`
/// taps. Applied along rows and then columns it equals the normalized 2D
/// Gaussian of the same support.
pub fn gaussian_kernel(r: f64) -> Vec<f32> {
    assert!(r > 0.0, "sigma must be > 0.0");
    let kernel_size = kernel_size_for_sigma(r);
    let half_width = (kernel_size / 2) as i32;
    let mut kernel: Vec<f32> = (-half_width..=half_width)
        .map(|i| gaussian(i as f32, r as f32))
        .collect();
    let sum: f32 = kernel.iter().sum();
    for val in kernel.iter_mut() {
        *val /= sum;
    }
    kernel
}

/// A kernel split into 4 wide lanes, zero padded.
struct SimdKernel {
    lanes: Vec<f32x4>,
    radius: usize,
    /// Window length the lanes consume, a multiple of 4.
    window: usize,
}

impl SimdKernel {
    fn new(kernel: &[f32]) -> Self {
        debug_assert!(kernel.len() % 2 == 1);
        let lanes = kernel
            .chunks(4)
            .map(|chunk| {
                let data = [
                    #[allow(clippy::get_first)]
                    chunk.get(0).copied().unwrap_or(0.0),
                    chunk.get(1).copied().unwrap_or(0.0),
                    chunk.get(2).copied().unwrap_or(0.0),
                    chunk.get(3).copied().unwrap_or(0.0),
                ];
                f32x4::new(data)
            })
            .collect::<Vec<_>>();
        Self {
            window: lanes.len() * 4,
            lanes,
            radius: kernel.len() / 2,
        }
    }

    /// Scratch length needed to produce `outputs` values.
    fn scratch_len(&self, outputs: usize) -> usize {
        outputs + self.window - 1
    }

    fn apply(&self, scratch: &[f32], output: &mut [f32]) {
        scratch
            .windows(self.window)
            .zip(output.iter_mut())
            .for_each(|(window, out)| {
                *out = window
                    .chunks_exact(4)
                    .map(|chunk| f32x4::new([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .zip(self.lanes.iter())
                    .fold(f32x4::splat(0.), |acc, (a, b)| a.mul_add(*b, acc))
                    .reduce_add()
            });
    }
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Blur the pixels inside `boundary` with the separable `kernel`, sampling
/// outside the image by clamping to the nearest edge pixel.
///
/// Only the tile's output is computed, but the value of each pixel depends
/// only on its position, never on how the image was tiled.
///
/// Returns the tile row-major.
pub fn blur_tile(image: &GrayFloatImage, kernel: &[f32], boundary: &ChunkBoundary) -> Vec<f32> {
    let simd = SimdKernel::new(kernel);
    let (width, height) = image.dimensions();
    let tile_width = boundary.width();
    let tile_height = boundary.height();
    let radius = simd.radius as isize;

    // Horizontal pass over every row the vertical pass will touch.
    let pass_rows = tile_height + 2 * simd.radius;
    let mut horizontal = vec![0f32; pass_rows * tile_width];
    let mut scratch = vec![0f32; simd.scratch_len(tile_width)];
    for (j, out_row) in horizontal.chunks_exact_mut(tile_width).enumerate() {
        let row = image.row(clamp_index(boundary.y1 as isize + j as isize - radius, height));
        for (c, cell) in scratch.iter_mut().enumerate().take(tile_width + 2 * simd.radius) {
            *cell = row[clamp_index(boundary.x1 as isize + c as isize - radius, width)];
        }
        simd.apply(&scratch, out_row);
    }

    // Vertical pass, one tile column at a time.
    let mut output = vec![0f32; tile_width * tile_height];
    let mut column_scratch = vec![0f32; simd.scratch_len(tile_height)];
    let mut column_out = vec![0f32; tile_height];
    for c in 0..tile_width {
        for (j, cell) in column_scratch.iter_mut().enumerate().take(pass_rows) {
            *cell = horizontal[j * tile_width + c];
        }
        simd.apply(&column_scratch, &mut column_out);
        for (r, &value) in column_out.iter().enumerate() {
            output[r * tile_width + c] = value;
        }
    }
    output
}

/// Perform Gaussian blur on a whole image as a single tile.
///
/// # Arguments
/// * `r` - sigma.
/// # Return value
/// The resulting image after the filter was applied.
pub fn gaussian_blur(image: &GrayFloatImage, r: f64) -> GrayFloatImage {
    let kernel = gaussian_kernel(r);
    let boundary = ChunkBoundary::whole(image.width(), image.height());
    let mut output = GrayFloatImage::new(image.width(), image.height());
    output.write_tile(&boundary, &blur_tile(image, &kernel, &boundary));
    output
}
