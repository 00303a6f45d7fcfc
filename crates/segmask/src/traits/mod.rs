use std::path::Path;

use crate::{
    algorithms::RecipeEntry,
    error::Result,
    raster::PixelBuffer,
    types::Coordinate,
};

/// Trait for anything that can be turned into a decodable recipe entry
pub trait RecipeSource: Send + Sync {
    /// Identifier used when reporting a skipped entry
    fn guid(&self) -> Option<&str>;

    /// Validate and convert into integer scanline data
    fn to_entry(&self) -> Result<RecipeEntry>;
}

/// Trait for region-growing segmentation algorithms
pub trait RegionSegmenter: Send + Sync {
    /// Collect the coordinates of the region grown from `seed`.
    /// A seed outside the image yields an empty region.
    fn segment(&self, image: &PixelBuffer, seed: Coordinate) -> Vec<Coordinate>;
}

/// Trait for encoding a raster to a file on disk
pub trait PatchWriter: Send + Sync {
    /// Write `buffer` to `path`, replacing any existing file
    fn write(&self, buffer: &PixelBuffer, path: &Path) -> Result<()>;
}

impl<T: RecipeSource + ?Sized> RecipeSource for Box<T> {
    fn guid(&self) -> Option<&str> {
        (**self).guid()
    }

    fn to_entry(&self) -> Result<RecipeEntry> {
        (**self).to_entry()
    }
}
