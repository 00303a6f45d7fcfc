pub mod image;
pub mod persist;
pub mod recipe;

pub use self::image::{ImageFileWriter, load_image, load_image_from_bytes, save_image};
pub use persist::{PatchPersister, PersistFailure, PersistReport};
pub use recipe::{RawMaskNode, RawRecipeEntry, RawScanline, parse_recipe_xml, read_recipe_file};
