use crate::pipeline::CancelToken;
use crate::{Error, Result};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// A tile `[x1, x2) x [y1, y2)` of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkBoundary {
    pub x1: usize,
    pub y1: usize,
    pub x2: usize,
    pub y2: usize,
}

impl ChunkBoundary {
    pub fn whole(width: usize, height: usize) -> Self {
        Self {
            x1: 0,
            y1: 0,
            x2: width,
            y2: height,
        }
    }

    pub fn width(&self) -> usize {
        self.x2 - self.x1
    }

    pub fn height(&self) -> usize {
        self.y2 - self.y1
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }
}

/// Split a `width` x `height` image into `chunk_size` square tiles, column of
/// tiles by column of tiles. Tiles on the right and bottom edges are cropped
/// to the image, so the tiles cover every pixel exactly once.
pub fn partition(width: usize, height: usize, chunk_size: usize) -> Result<Vec<ChunkBoundary>> {
    if chunk_size == 0 {
        return Err(Error::InvalidConfig("chunk size must be positive"));
    }
    let columns = (width + chunk_size - 1) / chunk_size;
    let rows = (height + chunk_size - 1) / chunk_size;
    let mut boundaries = Vec::with_capacity(columns * rows);
    for x1 in (0..width).step_by(chunk_size) {
        let x2 = (x1 + chunk_size).min(width);
        for y1 in (0..height).step_by(chunk_size) {
            let y2 = (y1 + chunk_size).min(height);
            boundaries.push(ChunkBoundary { x1, y1, x2, y2 });
        }
    }
    Ok(boundaries)
}

/// Run `f` over every tile and collect the results in tile order. The token
/// is checked before each tile starts.
pub(crate) fn map_tiles<T, F>(
    boundaries: &[ChunkBoundary],
    cancel: &CancelToken,
    f: F,
) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&ChunkBoundary) -> T + Sync,
{
    let process = |boundary: &ChunkBoundary| {
        if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(f(boundary))
        }
    };
    #[cfg(not(feature = "rayon"))]
    let tiles = boundaries.iter().map(process).collect();
    #[cfg(feature = "rayon")]
    let tiles = boundaries.par_iter().map(process).collect();
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_tiling(width: usize, height: usize, chunk_size: usize) {
        let boundaries = partition(width, height, chunk_size).unwrap();
        let mut hits = vec![0u32; width * height];
        for b in &boundaries {
            assert!(b.x1 < b.x2 && b.y1 < b.y2, "empty tile {b:?}");
            assert!(b.width() <= chunk_size && b.height() <= chunk_size);
            for y in b.y1..b.y2 {
                for x in b.x1..b.x2 {
                    hits[y * width + x] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1));
    }

    #[test]
    fn partition_tiles_exactly() {
        assert_exact_tiling(16, 16, 8);
        assert_exact_tiling(17, 9, 8);
        assert_exact_tiling(5, 3, 1);
        assert_exact_tiling(5, 3, 100);
    }

    #[test]
    fn partition_order_is_column_major() {
        let boundaries = partition(10, 10, 6).unwrap();
        assert_eq!(
            boundaries,
            vec![
                ChunkBoundary {
                    x1: 0,
                    y1: 0,
                    x2: 6,
                    y2: 6,
                },
                ChunkBoundary {
                    x1: 0,
                    y1: 6,
                    x2: 6,
                    y2: 10,
                },
                ChunkBoundary {
                    x1: 6,
                    y1: 0,
                    x2: 10,
                    y2: 6,
                },
                ChunkBoundary {
                    x1: 6,
                    y1: 6,
                    x2: 10,
                    y2: 10,
                },
            ]
        );
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(matches!(partition(4, 4, 0), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn cancelled_token_stops_tiles() {
        let boundaries = partition(4, 4, 2).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = map_tiles(&boundaries, &cancel, |b| b.area());
        assert_eq!(result, Err(Error::Cancelled));
    }
}
