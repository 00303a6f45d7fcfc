pub mod builder;

use std::path::Path;

use rand::{SeedableRng, rngs::StdRng};
use tracing::info;

use crate::{
    algorithms::{CompositeLayer, MaskCompositor, PatchSampler, RefreshReport, StalePatchPolicy},
    error::Result,
    io::persist::{PatchPersister, PersistReport},
    raster::FrozenBuffer,
    types::PatchPoint,
};

/// Composite followed by the sampled patches cut from it
#[derive(Debug, Clone)]
pub struct PatchRun {
    pub composite: FrozenBuffer,
    pub patches: Vec<PatchPoint>,
}

/// Outcome of a full composite → sample → persist pass
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run: PatchRun,
    pub persisted: PersistReport,
}

/// The patch-extraction chain: composite the mask layers, sample windows,
/// write the selected ones to disk.
#[derive(Debug, Clone)]
pub struct PatchPipeline {
    compositor: MaskCompositor,
    sampler: PatchSampler,
    persister: PatchPersister,
    patch_count: usize,
    seed: Option<u64>,
    stale_policy: StalePatchPolicy,
}

impl PatchPipeline {
    /// Create a new pipeline builder
    pub fn builder() -> builder::PatchPipelineBuilder {
        builder::PatchPipelineBuilder::new()
    }

    pub fn new(
        compositor: MaskCompositor,
        sampler: PatchSampler,
        persister: PatchPersister,
        patch_count: usize,
        seed: Option<u64>,
        stale_policy: StalePatchPolicy,
    ) -> Self {
        Self {
            compositor,
            sampler,
            persister,
            patch_count,
            seed,
            stale_policy,
        }
    }

    pub fn patch_size(&self) -> u32 {
        self.sampler.patch_size
    }

    pub fn patch_count(&self) -> usize {
        self.patch_count
    }

    pub fn stale_policy(&self) -> StalePatchPolicy {
        self.stale_policy
    }

    pub fn compositor(&self) -> &MaskCompositor {
        &self.compositor
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Composite `layers` at the size of `dimensions`
    pub fn composite(&self, dimensions: (u32, u32), layers: &[CompositeLayer]) -> FrozenBuffer {
        self.compositor.composite(dimensions, layers)
    }

    /// Build a composite over `source` and sample patches from it
    pub fn generate(&self, source: &FrozenBuffer, layers: &[CompositeLayer]) -> Result<PatchRun> {
        let composite = self.composite(source.dimensions(), layers);
        let patches = self
            .sampler
            .sample(source, &composite, self.patch_count, &mut self.rng())?;
        Ok(PatchRun { composite, patches })
    }

    /// Re-crop the mask side of `patches` against a fresh composite of `layers`
    pub fn refresh(
        &self,
        patches: &[PatchPoint],
        dimensions: (u32, u32),
        layers: &[CompositeLayer],
    ) -> Result<RefreshReport> {
        let composite = self.composite(dimensions, layers);
        self.sampler.refresh(patches, &composite, self.stale_policy)
    }

    pub fn persist<P: AsRef<Path>>(&self, patches: &[PatchPoint], directory: P) -> Result<PersistReport> {
        self.persister.persist(patches, directory)
    }

    /// Run every stage in sequence
    pub fn process<P: AsRef<Path>>(
        &self,
        source: &FrozenBuffer,
        layers: &[CompositeLayer],
        directory: P,
    ) -> Result<PipelineOutput> {
        let run = self.generate(source, layers)?;
        let persisted = self.persist(&run.patches, directory)?;
        info!(
            patches = run.patches.len(),
            files = persisted.files_written,
            "patch pipeline finished"
        );
        Ok(PipelineOutput { run, persisted })
    }

    /// Get information about the pipeline configuration
    pub fn info(&self) -> String {
        format!(
            "PatchPipeline: {} patches of {}x{}, seed {:?}, stale policy {}, .{} files",
            self.patch_count,
            self.sampler.patch_size,
            self.sampler.patch_size,
            self.seed,
            self.stale_policy,
            self.persister.extension()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        raster::{PixelBuffer, PixelFormat},
        types::{ClassId, Color},
    };

    fn source(width: u32, height: u32) -> FrozenBuffer {
        PixelBuffer::new(width, height, PixelFormat::Gray8).freeze()
    }

    fn full_layer(width: u32, height: u32, color: Color, class: u32) -> CompositeLayer {
        let mut raster = PixelBuffer::new(width, height, PixelFormat::Bgra32);
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                raster.put_argb(x, y, color.to_argb());
            }
        }
        CompositeLayer {
            raster: raster.freeze(),
            color,
            visible: true,
            class: Some(ClassId(class)),
        }
    }

    #[test]
    fn test_generate_samples_from_composite() {
        let pipeline = PatchPipeline::builder().patch_count(12).patch_size(4).seed(3).build();
        let layers = vec![full_layer(16, 16, Color::rgb(9, 8, 7), 1)];

        let run = pipeline.generate(&source(16, 16), &layers).unwrap();
        assert_eq!(run.patches.len(), 12);
        assert_eq!(run.composite.argb_at(5, 5), Color::rgb(9, 8, 7).to_argb());
        for patch in &run.patches {
            assert_eq!(
                patch.mask_patch.as_ref().unwrap().argb_at(0, 0),
                Color::rgb(9, 8, 7).to_argb()
            );
        }
    }

    #[test]
    fn test_seeded_pipeline_repeats() {
        let pipeline = PatchPipeline::builder().patch_count(8).patch_size(2).seed(11).build();
        let first = pipeline.generate(&source(10, 10), &[]).unwrap();
        let second = pipeline.generate(&source(10, 10), &[]).unwrap();

        let first: Vec<_> = first.patches.iter().map(|p| p.coordinate).collect();
        let second: Vec<_> = second.patches.iter().map(|p| p.coordinate).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_refresh_uses_configured_policy() {
        let pipeline = PatchPipeline::builder()
            .patch_count(4)
            .patch_size(3)
            .seed(1)
            .stale_policy(StalePatchPolicy::Clear)
            .build();
        let run = pipeline.generate(&source(8, 8), &[]).unwrap();

        let report = pipeline.refresh(&run.patches, (2, 2), &[]).unwrap();
        assert_eq!(report.stale, 4);
        assert!(report.updates.iter().all(|(_, crop)| crop.is_none()));
    }

    #[test]
    fn test_process_writes_selected_patches() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PatchPipeline::builder().patch_count(3).patch_size(2).seed(5).build();

        let output = pipeline.process(&source(6, 6), &[], dir.path()).unwrap();
        assert_eq!(output.run.patches.len(), 3);
        assert!(output.persisted.files_written > 0);
        assert!(output.persisted.failures.is_empty());
    }

    #[test]
    fn test_info_mentions_configuration() {
        let info = PatchPipeline::builder().patch_count(7).patch_size(32).build().info();
        assert!(info.contains("7 patches of 32x32"), "{info}");
        assert!(info.contains("retain"), "{info}");
    }
}
