use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::raster::{FrozenBuffer, pack_argb};

/// Name of the class every freshly loaded mask starts in.
pub const UNCLASSIFIED: &str = "Unclassified";

/// Integer pixel position in source-image space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Map a click on a scaled view of the image back to source pixels.
    ///
    /// Scales each axis by `source / displayed` and truncates. Returns `None`
    /// when the displayed size is not positive or either input is not finite.
    pub fn from_display_point(
        click: (f64, f64),
        displayed_size: (f64, f64),
        source_size: (u32, u32),
    ) -> Option<Self> {
        let (shown_w, shown_h) = displayed_size;
        if !(shown_w > 0.0 && shown_h > 0.0) || !shown_w.is_finite() || !shown_h.is_finite() {
            return None;
        }
        if !click.0.is_finite() || !click.1.is_finite() {
            return None;
        }
        let x = click.0 * (source_size.0 as f64 / shown_w);
        let y = click.1 * (source_size.1 as f64 / shown_h);
        Some(Self::new(x as i32, y as i32))
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X: {}, Y: {}", self.x, self.y)
    }
}

/// Display color with 8-bit alpha, red, green and blue channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { a: 0xFF, r, g, b }
    }

    pub const fn argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { a, r, g, b }
    }

    /// Packed `alpha << 24 | red << 16 | green << 8 | blue`
    pub const fn to_argb(self) -> u32 {
        pack_argb(self.a, self.r, self.g, self.b)
    }

    /// Same color at full alpha
    pub const fn opaque(self) -> Self {
        Self { a: 0xFF, ..self }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MaskClass {
    pub id: ClassId,
    pub name: String,
    pub color: Color,
}

impl MaskClass {
    pub fn new(id: u32, name: impl Into<String>, color: Color) -> Self {
        Self {
            id: ClassId(id),
            name: name.into(),
            color,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.name == UNCLASSIFIED
    }
}

/// Ordered set of mask classes.
///
/// Label index 0 is background and belongs to `Unclassified`. Every other
/// class gets `1 + ` its position among the remaining classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ClassPalette {
    classes: Vec<MaskClass>,
}

impl ClassPalette {
    pub fn new(classes: Vec<MaskClass>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[MaskClass] {
        &self.classes
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn get(&self, id: ClassId) -> Option<&MaskClass> {
        self.classes.iter().find(|class| class.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&MaskClass> {
        self.classes.iter().find(|class| class.name == name)
    }

    /// Label value written into class-index exports. Saturates at 255.
    pub fn index_of(&self, id: ClassId) -> Option<u8> {
        let class = self.get(id)?;
        if class.is_unclassified() {
            return Some(0);
        }
        let position = self
            .classes
            .iter()
            .filter(|class| !class.is_unclassified())
            .position(|class| class.id == id)?;
        Some((position + 1).min(u8::MAX as usize) as u8)
    }

    /// The class new masks start in: `Unclassified` if present, otherwise the
    /// first class.
    pub fn default_class(&self) -> Option<&MaskClass> {
        self.by_name(UNCLASSIFIED).or_else(|| self.classes.first())
    }

    pub fn unclassified_id(&self) -> Option<ClassId> {
        self.by_name(UNCLASSIFIED).map(|class| class.id)
    }

    pub fn push(&mut self, class: MaskClass) {
        self.classes.push(class);
    }
}

impl Default for ClassPalette {
    fn default() -> Self {
        Self::new(vec![
            MaskClass::new(0, UNCLASSIFIED, Color::rgb(0x80, 0x80, 0x80)),
            MaskClass::new(1, "Pad", Color::rgb(0x1E, 0x90, 0xFF)),
            MaskClass::new(2, "Line", Color::rgb(0x7C, 0xFC, 0x00)),
            MaskClass::new(3, "Space", Color::rgb(0xFF, 0x45, 0x00)),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MaskId(pub u64);

impl fmt::Display for MaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mask#{}", self.0)
    }
}

/// One segmentation layer over the source image.
#[derive(Debug, Clone)]
pub struct Mask {
    pub id: MaskId,
    pub name: String,
    pub class: Option<ClassId>,
    /// Covered pixels carry nonzero alpha. Same size as the source image.
    pub raster: FrozenBuffer,
    pub visible: bool,
    /// Recipe nodes this mask was built from, as JSON
    pub rle_source: Option<String>,
}

impl Mask {
    pub fn new(id: MaskId, name: impl Into<String>, raster: FrozenBuffer) -> Self {
        Self {
            id,
            name: name.into(),
            class: None,
            raster,
            visible: true,
            rle_source: None,
        }
    }

    pub fn with_class(mut self, class: Option<ClassId>) -> Self {
        self.class = class;
        self
    }

    /// Edit the raster copy-on-write; snapshots taken earlier are unaffected.
    pub fn edit_raster<F>(&mut self, edit: F)
    where
        F: FnOnce(&mut crate::raster::PixelBuffer),
    {
        let mut raster = self.raster.clone().thaw();
        edit(&mut raster);
        self.raster = raster.freeze();
    }
}

/// A sampled window with its image and mask crops.
#[derive(Debug, Clone)]
pub struct PatchPoint {
    pub coordinate: Coordinate,
    pub image_patch: FrozenBuffer,
    pub mask_patch: Option<FrozenBuffer>,
    pub selected: bool,
}

impl PatchPoint {
    pub fn new(coordinate: Coordinate, image_patch: FrozenBuffer, mask_patch: FrozenBuffer) -> Self {
        Self {
            coordinate,
            image_patch,
            mask_patch: Some(mask_patch),
            selected: true,
        }
    }

    /// `x{X}-y{Y}`, shared prefix of the persisted file names
    pub fn base_name(&self) -> String {
        format!("x{}-y{}", self.coordinate.x, self.coordinate.y)
    }
}
