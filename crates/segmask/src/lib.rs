//! # Mask Segmentation and Patch Extraction Library
//!
//! Builds pixel-accurate segmentation masks over a raster image and cuts
//! random image/mask patch pairs out of them for dataset construction.
//!
//! ## Core Features
//!
//! - **Flood Fill Segmentation**: Grow a 4-connected region from a seed pixel under a fixed grayscale band
//! - **Recipe Decoding**: Rasterize run-length encoded masks from XML recipes, in parallel
//! - **Compositing**: Overwrite-merge class masks into a color preview or a class-index label map
//! - **Patch Sampling**: Draw random square windows over image and composite, refresh them after edits
//! - **Persistence**: Write selected patch pairs as `x{X}-y{Y}_image.png` / `x{X}-y{Y}_mask.png`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use segmask::{MaskManager, MaskManagerCommand};
//!
//! let mut manager = MaskManager::new();
//! manager.load_image("wafer.png")?;
//!
//! manager.execute(MaskManagerCommand::SegmentAtPoint { x: 120, y: 80, tolerance: None })?;
//! manager.execute(MaskManagerCommand::GeneratePatches { count: 50, patch_size: 64, seed: Some(7) })?;
//! manager.execute(MaskManagerCommand::SavePatches { directory: "patches".into() })?;
//! # Ok::<(), segmask::SegmaskError>(())
//! ```
//!
//! ## Custom Pipeline
//!
//! ```rust,no_run
//! use segmask::{PatchPipeline, StalePatchPolicy, io::load_image};
//!
//! let pipeline = PatchPipeline::builder()
//!     .patch_count(200)
//!     .patch_size(128)
//!     .seed(42)
//!     .stale_policy(StalePatchPolicy::Clear)
//!     .build();
//!
//! let source = load_image("wafer.png")?.freeze();
//! let output = pipeline.process(&source, &[], "patches")?;
//! println!("{} files written", output.persisted.files_written);
//! # Ok::<(), segmask::SegmaskError>(())
//! ```

// Core modules
pub mod error;
pub mod raster;
pub mod types;
pub mod traits;
pub mod cancel;
pub mod algorithms;
pub mod pipeline;
pub mod io;
pub mod manager;

// Re-exports for convenience
pub use error::{Result, SegmaskError};
pub use raster::{FrozenBuffer, PixelBuffer, PixelFormat};
pub use types::*;
pub use traits::*;
pub use cancel::CancelToken;
pub use algorithms::*;
pub use pipeline::{PatchPipeline, PatchRun, PipelineOutput, builder::PatchPipelineBuilder};
pub use io::{PatchPersister, PersistReport};
pub use manager::{CommandOutcome, MaskManager, MaskManagerCommand};
