use thiserror::Error;

use crate::types::{ClassId, MaskId};

#[derive(Error, Debug)]
pub enum SegmaskError {
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("No image loaded")]
    NoImageLoaded,

    #[error("Image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("No mask classes available")]
    NoMaskClasses,

    #[error("Unknown mask class: {0}")]
    UnknownClass(ClassId),

    #[error("Unknown mask: {0}")]
    UnknownMask(MaskId),

    #[error("Patch index {index} out of range ({len} patches)")]
    PatchIndexOutOfRange { index: usize, len: usize },

    #[error("Invalid display size ({width}x{height})")]
    InvalidDisplaySize { width: f64, height: f64 },

    #[error("Invalid display point ({x}, {y})")]
    InvalidDisplayPoint { x: f64, y: f64 },

    #[error("Invalid pixel buffer: {0}")]
    InvalidBuffer(String),

    #[error("Malformed recipe: {0}")]
    MalformedRecipe(String),

    #[error("Recipe XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SegmaskError>;
