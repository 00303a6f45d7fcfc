//! Boundary between encoded image files and [`PixelBuffer`]s.

use std::path::Path;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use crate::{
    error::Result,
    raster::{PixelBuffer, PixelFormat},
    traits::PatchWriter,
};

/// Decode an image file (PNG, JPEG, BMP, TIFF) into a pixel buffer.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<PixelBuffer> {
    let image = image::open(path)?;
    from_dynamic_image(&image)
}

/// Decode an in-memory encoded image
pub fn load_image_from_bytes(bytes: &[u8]) -> Result<PixelBuffer> {
    let image = image::load_from_memory(bytes)?;
    from_dynamic_image(&image)
}

/// Convert a decoded image. 8-bit gray and RGB keep their layout, everything
/// else is widened to BGRA.
pub fn from_dynamic_image(image: &DynamicImage) -> Result<PixelBuffer> {
    let (width, height) = (image.width(), image.height());
    match image {
        DynamicImage::ImageLuma8(gray) => PixelBuffer::from_raw(
            width,
            height,
            PixelFormat::Gray8,
            width as usize,
            gray.as_raw().clone(),
        ),
        DynamicImage::ImageRgb8(rgb) => PixelBuffer::from_raw(
            width,
            height,
            PixelFormat::Rgb24,
            width as usize * 3,
            rgb.as_raw().clone(),
        ),
        other => {
            let mut bytes = other.to_rgba8().into_raw();
            for pixel in bytes.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
            PixelBuffer::from_raw(width, height, PixelFormat::Bgra32, width as usize * 4, bytes)
        }
    }
}

/// Convert a pixel buffer into an `image` crate image, dropping row padding.
pub fn to_dynamic_image(buffer: &PixelBuffer) -> DynamicImage {
    let (width, height) = buffer.dimensions();
    let at = |x: u32, y: u32| buffer.pixel_bytes(x as i32, y as i32);

    match buffer.format() {
        PixelFormat::Gray8 => DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            Luma([at(x, y).map_or(0, |px| px[0])])
        })),
        PixelFormat::Rgb24 => DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            at(x, y).map_or(Rgb([0, 0, 0]), |px| Rgb([px[0], px[1], px[2]]))
        })),
        PixelFormat::Bgra32 => DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            at(x, y).map_or(Rgba([0, 0, 0, 0]), |px| Rgba([px[2], px[1], px[0], px[3]]))
        })),
    }
}

/// Encode a buffer to `path`, picking the format from the file extension.
pub fn save_image<P: AsRef<Path>>(buffer: &PixelBuffer, path: P) -> Result<()> {
    let path = path.as_ref();
    let format = ImageFormat::from_path(path)?;
    to_dynamic_image(buffer).save_with_format(path, format)?;
    Ok(())
}

/// [`PatchWriter`] backed by the `image` crate encoders
#[derive(Debug, Clone, Default)]
pub struct ImageFileWriter;

impl PatchWriter for ImageFileWriter {
    fn write(&self, buffer: &PixelBuffer, path: &Path) -> Result<()> {
        save_image(buffer, path)
    }
}
