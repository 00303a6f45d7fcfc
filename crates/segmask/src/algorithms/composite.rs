use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::{
    raster::{FrozenBuffer, PixelBuffer, PixelFormat},
    types::{ClassId, ClassPalette, Color, Mask},
};

/// How covered pixels are written into the composite
#[derive(Debug, Clone, Default)]
pub enum CompositeEncoding {
    /// BGRA output holding each layer's packed ARGB color (interactive preview)
    #[default]
    Color,
    /// Gray8 output holding each layer's class index in the palette (label export)
    ClassIndex(ClassPalette),
}

/// A frozen snapshot of one mask, ready to be composited
#[derive(Debug, Clone)]
pub struct CompositeLayer {
    pub raster: FrozenBuffer,
    pub color: Color,
    pub visible: bool,
    pub class: Option<ClassId>,
}

impl CompositeLayer {
    /// Snapshot a mask using its class color.
    ///
    /// Masks without a class, or whose class is missing from the palette,
    /// have no color to draw with and yield `None`.
    pub fn from_mask(mask: &Mask, palette: &ClassPalette) -> Option<Self> {
        let class = palette.get(mask.class?)?;
        Some(Self {
            raster: mask.raster.clone(),
            color: class.color,
            visible: mask.visible,
            class: Some(class.id),
        })
    }
}

/// Snapshot every mask that can take part in a composite, preserving order.
pub fn snapshot_layers(masks: &[Mask], palette: &ClassPalette) -> Vec<CompositeLayer> {
    masks
        .iter()
        .filter_map(|mask| CompositeLayer::from_mask(mask, palette))
        .collect()
}

/// Merges mask layers into one raster by overwrite priority.
///
/// Layers are applied in list order; for every pixel a layer covers, its value
/// replaces whatever is there. Later layers win, nothing is blended.
#[derive(Debug, Clone, Default)]
pub struct MaskCompositor {
    exclude: BTreeSet<ClassId>,
    encoding: CompositeEncoding,
}

impl MaskCompositor {
    pub fn new(encoding: CompositeEncoding) -> Self {
        Self {
            exclude: BTreeSet::new(),
            encoding,
        }
    }

    /// Skip every layer of `class` entirely
    pub fn exclude(mut self, class: ClassId) -> Self {
        self.exclude.insert(class);
        self
    }

    pub fn exclude_all<I>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = ClassId>,
    {
        self.exclude.extend(classes);
        self
    }

    pub fn encoding(&self) -> &CompositeEncoding {
        &self.encoding
    }

    fn accepts(&self, layer: &CompositeLayer) -> bool {
        layer.visible && !layer.class.is_some_and(|class| self.exclude.contains(&class))
    }

    pub fn composite(&self, dimensions: (u32, u32), layers: &[CompositeLayer]) -> FrozenBuffer {
        let (width, height) = dimensions;
        let format = match self.encoding {
            CompositeEncoding::Color => PixelFormat::Bgra32,
            CompositeEncoding::ClassIndex(_) => PixelFormat::Gray8,
        };
        let mut output = PixelBuffer::new(width, height, format);
        let mut applied = 0usize;

        for layer in layers.iter().filter(|layer| self.accepts(layer)) {
            if layer.raster.dimensions() != dimensions {
                warn!(
                    expected = ?dimensions,
                    actual = ?layer.raster.dimensions(),
                    "skipping mask layer with mismatched size"
                );
                continue;
            }

            let value = match &self.encoding {
                CompositeEncoding::Color => layer.color.to_argb().to_le_bytes().to_vec(),
                CompositeEncoding::ClassIndex(palette) => {
                    vec![layer.class.and_then(|class| palette.index_of(class)).unwrap_or(0)]
                }
            };

            for y in 0..height as i32 {
                for x in 0..width as i32 {
                    if layer.raster.coverage_at(x, y) > 0 {
                        output.write_pixel(x, y, &value);
                    }
                }
            }
            applied += 1;
        }

        debug!(layers = layers.len(), applied, ?format, "composite built");
        output.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MaskClass, MaskId};

    fn layer(width: u32, height: u32, pixels: &[(i32, i32)], color: Color, class: u32) -> CompositeLayer {
        let mut raster = PixelBuffer::new(width, height, PixelFormat::Bgra32);
        for &(x, y) in pixels {
            raster.put_argb(x, y, color.to_argb());
        }
        CompositeLayer {
            raster: raster.freeze(),
            color,
            visible: true,
            class: Some(ClassId(class)),
        }
    }

    const RED: Color = Color::rgb(255, 0, 0);
    const BLUE: Color = Color::rgb(0, 0, 255);

    #[test]
    fn test_later_layer_wins_on_overlap() {
        let layers = vec![
            layer(3, 1, &[(0, 0), (1, 0)], RED, 1),
            layer(3, 1, &[(1, 0), (2, 0)], BLUE, 2),
        ];
        let output = MaskCompositor::default().composite((3, 1), &layers);

        assert_eq!(output.argb_at(0, 0), RED.to_argb());
        assert_eq!(output.argb_at(1, 0), BLUE.to_argb());
        assert_eq!(output.argb_at(2, 0), BLUE.to_argb());
    }

    #[test]
    fn test_composite_is_deterministic() {
        let layers = vec![
            layer(8, 8, &[(0, 0), (3, 3), (7, 7)], RED, 1),
            layer(8, 8, &[(3, 3), (4, 4)], BLUE, 2),
            layer(8, 8, &[(4, 4), (5, 5)], Color::argb(0x80, 1, 2, 3), 3),
        ];
        let compositor = MaskCompositor::default();

        let first = compositor.composite((8, 8), &layers);
        let second = compositor.composite((8, 8), &layers);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_no_alpha_blending() {
        let translucent = Color::argb(0x40, 10, 20, 30);
        let layers = vec![layer(1, 1, &[(0, 0)], RED, 1), layer(1, 1, &[(0, 0)], translucent, 2)];
        let output = MaskCompositor::default().composite((1, 1), &layers);
        assert_eq!(output.argb_at(0, 0), translucent.to_argb());
    }

    #[test]
    fn test_hidden_and_excluded_layers_are_skipped() {
        let mut hidden = layer(2, 1, &[(0, 0)], RED, 1);
        hidden.visible = false;
        let excluded = layer(2, 1, &[(1, 0)], BLUE, 0);

        let output = MaskCompositor::default()
            .exclude(ClassId(0))
            .composite((2, 1), &[hidden, excluded.clone()]);
        assert_eq!(output.as_bytes(), &[0u8; 8]);

        // Without the exclusion the same layer is drawn.
        let preview = MaskCompositor::default().composite((2, 1), &[excluded]);
        assert_eq!(preview.argb_at(1, 0), BLUE.to_argb());
    }

    #[test]
    fn test_class_index_encoding() {
        let palette = ClassPalette::default();
        let layers = vec![
            layer(3, 1, &[(0, 0)], RED, 2),
            layer(3, 1, &[(1, 0)], BLUE, 3),
            layer(3, 1, &[(2, 0)], BLUE, 0),
        ];
        let output = MaskCompositor::new(CompositeEncoding::ClassIndex(palette.clone()))
            .exclude(palette.unclassified_id().unwrap())
            .composite((3, 1), &layers);

        assert_eq!(output.format(), PixelFormat::Gray8);
        assert_eq!(output.as_bytes(), &[2, 3, 0]);
    }

    #[test]
    fn test_mismatched_layer_is_skipped() {
        let layers = vec![layer(2, 2, &[(0, 0)], RED, 1), layer(3, 3, &[(1, 1)], BLUE, 1)];
        let output = MaskCompositor::default().composite((2, 2), &layers);
        assert_eq!(output.argb_at(0, 0), RED.to_argb());
        assert_eq!(output.argb_at(1, 1), 0);
    }

    #[test]
    fn test_snapshot_skips_unclassified_masks() {
        let palette = ClassPalette::new(vec![MaskClass::new(5, "Pad", RED)]);
        let raster = PixelBuffer::new(1, 1, PixelFormat::Bgra32).freeze();
        let masks = vec![
            Mask::new(MaskId(1), "a", raster.clone()).with_class(Some(ClassId(5))),
            Mask::new(MaskId(2), "b", raster.clone()),
            Mask::new(MaskId(3), "c", raster).with_class(Some(ClassId(9))),
        ];

        let layers = snapshot_layers(&masks, &palette);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].color, RED);
    }
}
