use std::collections::VecDeque;

use tracing::debug;

use crate::{raster::PixelBuffer, traits::RegionSegmenter, types::Coordinate};

/// Tolerance used when a mask is created from a click without explicit settings
pub const DEFAULT_TOLERANCE: u32 = 10;

/// S, N, E, W
const NEIGHBOURS: [(i32, i32); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];

/// Single-reference flood fill over the grayscale channel.
///
/// The acceptance band `[seed - tolerance, seed + tolerance]` is fixed by the
/// seed pixel and never re-centred on visited pixels. Tolerances above 255
/// behave like 255.
#[derive(Debug, Clone)]
pub struct FloodFillSegmenter {
    pub tolerance: u32,
}

impl Default for FloodFillSegmenter {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOLERANCE }
    }
}

impl FloodFillSegmenter {
    pub fn new(tolerance: u32) -> Self {
        Self { tolerance }
    }
}

impl RegionSegmenter for FloodFillSegmenter {
    fn segment(&self, image: &PixelBuffer, seed: Coordinate) -> Vec<Coordinate> {
        if !image.contains(seed.x, seed.y) {
            return Vec::new();
        }

        let width = image.width() as usize;
        let seed_gray = image.gray_at(seed.x, seed.y) as i32;
        let tolerance = self.tolerance.min(u8::MAX as u32) as i32;
        let band = (seed_gray - tolerance)..=(seed_gray + tolerance);

        let mut visited = vec![false; width * image.height() as usize];
        let mut queue = VecDeque::new();
        let mut region = Vec::new();

        visited[seed.y as usize * width + seed.x as usize] = true;
        queue.push_back(seed);

        while let Some(point) = queue.pop_front() {
            region.push(point);

            for (dx, dy) in NEIGHBOURS {
                let (nx, ny) = (point.x + dx, point.y + dy);
                if !image.contains(nx, ny) {
                    continue;
                }
                let index = ny as usize * width + nx as usize;
                if visited[index] {
                    continue;
                }
                visited[index] = true;

                if band.contains(&(image.gray_at(nx, ny) as i32)) {
                    queue.push_back(Coordinate::new(nx, ny));
                }
            }
        }

        debug!(
            seed = %seed,
            seed_gray,
            tolerance,
            pixels = region.len(),
            "flood fill complete"
        );
        region
    }
}
