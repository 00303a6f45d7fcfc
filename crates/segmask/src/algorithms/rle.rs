use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    error::Result,
    raster::{FrozenBuffer, PixelBuffer, PixelFormat},
    traits::RecipeSource,
    types::Color,
};

/// One run of covered pixels, relative to the owning node's bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scanline {
    pub x: i32,
    pub y: i32,
    pub length: i32,
}

/// A bounding-box origin plus the scanlines inside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeMaskNode {
    pub bound_top: i32,
    pub bound_left: i32,
    pub scanlines: Vec<Scanline>,
}

/// All nodes of a single recipe mask; their union is one mask.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecipeEntry {
    pub guid: Option<String>,
    pub nodes: Vec<RecipeMaskNode>,
}

impl RecipeSource for RecipeEntry {
    fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    fn to_entry(&self) -> Result<RecipeEntry> {
        Ok(self.clone())
    }
}

/// A successfully decoded recipe entry
#[derive(Debug, Clone)]
pub struct DecodedEntry {
    /// Position of the entry in the input batch
    pub index: usize,
    pub entry: RecipeEntry,
    pub raster: FrozenBuffer,
}

/// A recipe entry that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub guid: Option<String>,
    pub reason: String,
}

/// Outcome of a batch decode: everything that worked plus what was skipped
#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub decoded: Vec<DecodedEntry>,
    pub skipped: Vec<SkippedEntry>,
}

enum Unit {
    Decoded(DecodedEntry),
    Skipped(SkippedEntry),
}

/// Rasterizes recipe scanlines into BGRA mask buffers of a fixed size.
#[derive(Debug, Clone)]
pub struct RleMaskDecoder {
    pub width: u32,
    pub height: u32,
    pub color: Color,
}

impl RleMaskDecoder {
    pub fn new(width: u32, height: u32, color: Color) -> Self {
        Self { width, height, color }
    }

    /// Paint every run of every node into a fresh zeroed buffer.
    ///
    /// Rows outside the raster are skipped and columns are clipped to it.
    /// Runs with a non-positive length paint nothing.
    pub fn decode(&self, nodes: &[RecipeMaskNode]) -> PixelBuffer {
        let mut buffer = PixelBuffer::new(self.width, self.height, PixelFormat::Bgra32);
        let argb = self.color.opaque().to_argb();
        let (width, height) = (self.width as i64, self.height as i64);

        for node in nodes {
            for line in &node.scanlines {
                let y = node.bound_top as i64 + line.y as i64;
                if y < 0 || y >= height {
                    continue;
                }
                let start = node.bound_left as i64 + line.x as i64;
                let end = start + line.length as i64;
                if line.length <= 0 || start >= width || end <= 0 {
                    continue;
                }

                for x in start.max(0)..end.min(width) {
                    buffer.put_argb(x as i32, y as i32, argb);
                }
            }
        }

        buffer
    }

    /// Decode independent recipe entries in parallel.
    ///
    /// Malformed entries are skipped and listed in the report; the rest still
    /// decode. Output order follows input order. A cancelled batch returns
    /// [`crate::SegmaskError::Cancelled`] and no partial result.
    pub fn decode_batch<S>(&self, sources: &[S], cancel: &CancelToken) -> Result<DecodeReport>
    where
        S: RecipeSource,
    {
        let units = sources
            .par_iter()
            .enumerate()
            .map(|(index, source)| -> Result<Unit> {
                cancel.check()?;
                Ok(match source.to_entry() {
                    Ok(entry) => {
                        let raster = self.decode(&entry.nodes).freeze();
                        debug!(index, guid = ?entry.guid, "decoded recipe entry");
                        Unit::Decoded(DecodedEntry { index, entry, raster })
                    }
                    Err(err) => {
                        warn!(index, guid = ?source.guid(), error = %err, "skipping recipe entry");
                        Unit::Skipped(SkippedEntry {
                            index,
                            guid: source.guid().map(str::to_owned),
                            reason: err.to_string(),
                        })
                    }
                })
            })
            .collect::<Result<Vec<Unit>>>()?;

        let mut report = DecodeReport::default();
        for unit in units {
            match unit {
                Unit::Decoded(decoded) => report.decoded.push(decoded),
                Unit::Skipped(skipped) => report.skipped.push(skipped),
            }
        }

        info!(
            decoded = report.decoded.len(),
            skipped = report.skipped.len(),
            "recipe batch decoded"
        );
        Ok(report)
    }
}

/// Run-length encode the covered pixels of a mask into a single node.
///
/// The node's bounding box is the tight box around the covered pixels, so
/// decoding it at the mask's size reproduces the same coverage. Returns
/// `None` when nothing is covered.
pub fn encode_mask(mask: &PixelBuffer) -> Option<RecipeMaskNode> {
    let (width, height) = (mask.width() as i32, mask.height() as i32);
    let mut runs: Vec<(i32, i32, i32)> = Vec::new();

    for y in 0..height {
        let mut x = 0;
        while x < width {
            if mask.coverage_at(x, y) == 0 {
                x += 1;
                continue;
            }
            let start = x;
            while x < width && mask.coverage_at(x, y) > 0 {
                x += 1;
            }
            runs.push((y, start, x - start));
        }
    }

    let top = runs.iter().map(|&(y, _, _)| y).min()?;
    let left = runs.iter().map(|&(_, x, _)| x).min()?;

    Some(RecipeMaskNode {
        bound_top: top,
        bound_left: left,
        scanlines: runs
            .into_iter()
            .map(|(y, x, length)| Scanline { x: x - left, y: y - top, length })
            .collect(),
    })
}
