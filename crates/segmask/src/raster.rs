//! Stride-aware raster storage.
//!
//! Every pixel access goes through [`PixelBuffer::offset`], which resolves
//! `(x, y)` to `y * stride + x * bytes_per_pixel` and checks the result against
//! the owned byte region. Reads outside the raster return `0`, writes outside
//! it are dropped and reported as `false`.

use std::{ops::Deref, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    error::{Result, SegmaskError},
    types::Coordinate,
};

const LUMA_RED: f64 = 0.299;
const LUMA_GREEN: f64 = 0.587;
const LUMA_BLUE: f64 = 0.114;

/// Grayscale value of an RGB triple, truncated to 8 bits.
#[inline]
pub fn luminance(red: u8, green: u8, blue: u8) -> u8 {
    (LUMA_RED * red as f64 + LUMA_GREEN * green as f64 + LUMA_BLUE * blue as f64) as u8
}

/// Byte layout of a single pixel.
///
/// `Bgra32` stores blue, green, red, alpha so that a little-endian `u32` read
/// yields the packed `alpha << 24 | red << 16 | green << 8 | blue` word.
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize,
    Display, EnumString, EnumIter, IntoStaticStr,
    PartialEq, Eq, Hash
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Bgra32,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb24 => 3,
            Self::Bgra32 => 4,
        }
    }
}

/// An owned raster with an explicit row stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Zero-initialized buffer with tightly packed rows
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = (width as usize).saturating_mul(format.bytes_per_pixel());
        Self {
            width,
            height,
            format,
            stride,
            data: vec![0; stride.saturating_mul(height as usize)],
        }
    }

    /// Wrap decoded pixel bytes handed over by an image source.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        let min_stride = (width as usize)
            .checked_mul(format.bytes_per_pixel())
            .ok_or_else(|| SegmaskError::InvalidBuffer(format!("row of {width} pixels overflows")))?;
        if stride < min_stride {
            return Err(SegmaskError::InvalidBuffer(format!(
                "stride {stride} is smaller than {width} x {} bytes",
                format.bytes_per_pixel()
            )));
        }
        let required = stride.checked_mul(height as usize).ok_or_else(|| {
            SegmaskError::InvalidBuffer(format!("stride {stride} x {height} rows overflows"))
        })?;
        if data.len() < required {
            return Err(SegmaskError::InvalidBuffer(format!(
                "expected at least {required} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            stride,
            data,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// True when the raster has no pixels at all
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    /// Byte offset of `(x, y)`, or `None` if the pixel is not backed by the buffer.
    #[inline]
    pub fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if !self.contains(x, y) {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = y as usize * self.stride + x as usize * bpp;
        (offset + bpp <= self.data.len()).then_some(offset)
    }

    pub fn pixel_bytes(&self, x: i32, y: i32) -> Option<&[u8]> {
        let offset = self.offset(x, y)?;
        Some(&self.data[offset..offset + self.format.bytes_per_pixel()])
    }

    /// Grayscale value at `(x, y)`; `0` outside the raster.
    pub fn gray_at(&self, x: i32, y: i32) -> u8 {
        match (self.format, self.pixel_bytes(x, y)) {
            (PixelFormat::Gray8, Some(px)) => px[0],
            (PixelFormat::Rgb24, Some(px)) => luminance(px[0], px[1], px[2]),
            (PixelFormat::Bgra32, Some(px)) => luminance(px[2], px[1], px[0]),
            (_, None) => 0,
        }
    }

    /// How strongly `(x, y)` is covered: alpha for `Bgra32`, the value itself
    /// for `Gray8`, the brightest channel for `Rgb24`.
    pub fn coverage_at(&self, x: i32, y: i32) -> u8 {
        match (self.format, self.pixel_bytes(x, y)) {
            (PixelFormat::Gray8, Some(px)) => px[0],
            (PixelFormat::Rgb24, Some(px)) => px[0].max(px[1]).max(px[2]),
            (PixelFormat::Bgra32, Some(px)) => px[3],
            (_, None) => 0,
        }
    }

    /// Packed `alpha << 24 | red << 16 | green << 8 | blue` at `(x, y)`.
    pub fn argb_at(&self, x: i32, y: i32) -> u32 {
        match (self.format, self.pixel_bytes(x, y)) {
            (PixelFormat::Gray8, Some(px)) => pack_argb(0xFF, px[0], px[0], px[0]),
            (PixelFormat::Rgb24, Some(px)) => pack_argb(0xFF, px[0], px[1], px[2]),
            (PixelFormat::Bgra32, Some(px)) => u32::from_le_bytes([px[0], px[1], px[2], px[3]]),
            (_, None) => 0,
        }
    }

    /// Overwrite the raw bytes of one pixel. `bytes` must be exactly one pixel wide.
    pub fn write_pixel(&mut self, x: i32, y: i32, bytes: &[u8]) -> bool {
        let bpp = self.format.bytes_per_pixel();
        if bytes.len() != bpp {
            return false;
        }
        match self.offset(x, y) {
            Some(offset) => {
                self.data[offset..offset + bpp].copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Store a packed ARGB word, converting to the buffer's layout.
    pub fn put_argb(&mut self, x: i32, y: i32, argb: u32) -> bool {
        let [blue, green, red, alpha] = argb.to_le_bytes();
        match self.format {
            PixelFormat::Gray8 => self.write_pixel(x, y, &[luminance(red, green, blue)]),
            PixelFormat::Rgb24 => self.write_pixel(x, y, &[red, green, blue]),
            PixelFormat::Bgra32 => self.write_pixel(x, y, &[blue, green, red, alpha]),
        }
    }

    /// Paint every listed coordinate with `argb`, returning how many landed.
    pub fn paint_points<'a, I>(&mut self, points: I, argb: u32) -> usize
    where
        I: IntoIterator<Item = &'a Coordinate>,
    {
        points
            .into_iter()
            .filter(|point| self.put_argb(point.x, point.y, argb))
            .count()
    }

    /// Number of pixels with nonzero coverage
    pub fn covered_count(&self) -> usize {
        (0..self.height as i32)
            .flat_map(|y| (0..self.width as i32).map(move |x| (x, y)))
            .filter(|&(x, y)| self.coverage_at(x, y) > 0)
            .count()
    }

    /// Replace the color of every covered pixel, keeping uncovered ones untouched.
    pub fn recolor_covered(&mut self, argb: u32) {
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                if self.coverage_at(x, y) > 0 {
                    self.put_argb(x, y, argb);
                }
            }
        }
    }

    /// Copy out a `width x height` window at `(x, y)`.
    ///
    /// Returns `None` for empty windows and windows that leave the raster.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Option<PixelBuffer> {
        if width == 0 || height == 0 {
            return None;
        }
        let right = x.checked_add(width)?;
        let bottom = y.checked_add(height)?;
        if right > self.width || bottom > self.height {
            return None;
        }

        let bpp = self.format.bytes_per_pixel();
        let row_bytes = width as usize * bpp;
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in y..bottom {
            let start = row as usize * self.stride + x as usize * bpp;
            data.extend_from_slice(self.data.get(start..start + row_bytes)?);
        }

        Some(PixelBuffer {
            width,
            height,
            format: self.format,
            stride: row_bytes,
            data,
        })
    }

    /// Publish the buffer for shared, read-only use.
    pub fn freeze(self) -> FrozenBuffer {
        FrozenBuffer(Arc::new(self))
    }
}

#[inline]
pub const fn pack_argb(alpha: u8, red: u8, green: u8, blue: u8) -> u32 {
    (alpha as u32) << 24 | (red as u32) << 16 | (green as u32) << 8 | blue as u32
}

/// A published [`PixelBuffer`]. Any number of threads may read it; none may
/// write it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenBuffer(Arc<PixelBuffer>);

impl FrozenBuffer {
    /// Take back a mutable copy. Other holders keep seeing the old pixels.
    pub fn thaw(self) -> PixelBuffer {
        Arc::unwrap_or_clone(self.0)
    }

    pub fn ptr_eq(&self, other: &FrozenBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for FrozenBuffer {
    type Target = PixelBuffer;

    fn deref(&self) -> &PixelBuffer {
        &self.0
    }
}

impl From<PixelBuffer> for FrozenBuffer {
    fn from(buffer: PixelBuffer) -> Self {
        buffer.freeze()
    }
}
