use rand::Rng;
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr, VariantNames};
use tracing::{debug, info};

use crate::{
    cancel::CancelToken,
    error::Result,
    raster::FrozenBuffer,
    types::{Coordinate, PatchPoint},
};

/// What a refresh does with a patch whose window no longer fits the composite
#[derive(
    Debug, Clone, Copy, Default,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, VariantNames, IntoStaticStr,
    PartialEq, Eq
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StalePatchPolicy {
    /// Keep the previous mask crop
    #[default]
    Retain,
    /// Drop the mask crop so the patch carries no mask
    Clear,
}

/// New mask crops computed against a fresh composite, not yet applied
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// `(patch index, new mask crop)`; patches left untouched are absent
    pub updates: Vec<(usize, Option<FrozenBuffer>)>,
    pub refreshed: usize,
    pub stale: usize,
}

impl RefreshReport {
    /// Hand the new crops over to the owning patch list.
    pub fn apply(self, patches: &mut [PatchPoint]) {
        for (index, mask_patch) in self.updates {
            if let Some(patch) = patches.get_mut(index) {
                patch.mask_patch = mask_patch;
            }
        }
    }
}

/// Draws random square windows over a source image and its composite mask.
#[derive(Debug, Clone)]
pub struct PatchSampler {
    pub patch_size: u32,
    cancel: CancelToken,
}

impl PatchSampler {
    pub fn new(patch_size: u32) -> Self {
        Self {
            patch_size,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether a window of this size fits inside `dimensions` at all
    pub fn fits(&self, dimensions: (u32, u32)) -> bool {
        self.patch_size > 0 && self.patch_size < dimensions.0 && self.patch_size < dimensions.1
    }

    /// Sample `count` windows.
    ///
    /// Top-left corners are uniform over `[0, w - size] x [0, h - size]` and
    /// may repeat or overlap. Oversized windows, or a composite whose size
    /// differs from the source, produce no patches.
    pub fn sample<R>(
        &self,
        source: &FrozenBuffer,
        composite: &FrozenBuffer,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<PatchPoint>>
    where
        R: Rng + ?Sized,
    {
        let (width, height) = source.dimensions();
        if !self.fits((width, height)) || composite.dimensions() != (width, height) {
            debug!(
                patch_size = self.patch_size,
                source = ?source.dimensions(),
                composite = ?composite.dimensions(),
                "patch window does not fit, nothing sampled"
            );
            return Ok(Vec::new());
        }

        let size = self.patch_size;
        let corners: Vec<(u32, u32)> = (0..count)
            .map(|_| (rng.gen_range(0..=width - size), rng.gen_range(0..=height - size)))
            .collect();

        let patches = corners
            .into_par_iter()
            .map(|(x, y)| -> Result<Option<PatchPoint>> {
                self.cancel.check()?;
                let image = source.crop(x, y, size, size);
                let mask = composite.crop(x, y, size, size);
                Ok(image.zip(mask).map(|(image, mask)| {
                    PatchPoint::new(Coordinate::new(x as i32, y as i32), image.freeze(), mask.freeze())
                }))
            })
            .collect::<Result<Vec<Option<PatchPoint>>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        info!(requested = count, sampled = patches.len(), patch_size = size, "patches sampled");
        Ok(patches)
    }

    /// Re-crop mask windows of existing patches against a new composite.
    ///
    /// Image crops and coordinates are left alone. Windows that fall outside
    /// the composite are handled according to `policy`.
    pub fn refresh(
        &self,
        patches: &[PatchPoint],
        composite: &FrozenBuffer,
        policy: StalePatchPolicy,
    ) -> Result<RefreshReport> {
        let size = self.patch_size;
        let crops = patches
            .par_iter()
            .map(|patch| -> Result<Option<FrozenBuffer>> {
                self.cancel.check()?;
                let Coordinate { x, y } = patch.coordinate;
                if x < 0 || y < 0 {
                    return Ok(None);
                }
                Ok(composite.crop(x as u32, y as u32, size, size).map(|crop| crop.freeze()))
            })
            .collect::<Result<Vec<Option<FrozenBuffer>>>>()?;

        let mut report = RefreshReport::default();
        for (index, crop) in crops.into_iter().enumerate() {
            match (crop, policy) {
                (Some(crop), _) => {
                    report.updates.push((index, Some(crop)));
                    report.refreshed += 1;
                }
                (None, StalePatchPolicy::Retain) => report.stale += 1,
                (None, StalePatchPolicy::Clear) => {
                    report.updates.push((index, None));
                    report.stale += 1;
                }
            }
        }

        info!(refreshed = report.refreshed, stale = report.stale, %policy, "mask patches refreshed");
        Ok(report)
    }
}
