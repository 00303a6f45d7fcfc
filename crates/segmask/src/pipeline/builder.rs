use crate::{
    algorithms::{CompositeEncoding, MaskCompositor, PatchSampler, StalePatchPolicy},
    cancel::CancelToken,
    io::persist::PatchPersister,
    pipeline::PatchPipeline,
    traits::PatchWriter,
    types::{ClassId, ClassPalette},
};

pub const DEFAULT_PATCH_COUNT: usize = 100;
pub const DEFAULT_PATCH_SIZE: u32 = 256;

/// Builder for creating patch pipelines with a fluent API
pub struct PatchPipelineBuilder {
    patch_count: usize,
    patch_size: u32,
    seed: Option<u64>,
    exclude: Vec<ClassId>,
    encoding: CompositeEncoding,
    stale_policy: StalePatchPolicy,
    persister: PatchPersister,
    cancel: CancelToken,
}

impl PatchPipelineBuilder {
    pub fn new() -> Self {
        Self {
            patch_count: DEFAULT_PATCH_COUNT,
            patch_size: DEFAULT_PATCH_SIZE,
            seed: None,
            exclude: Vec::new(),
            encoding: CompositeEncoding::Color,
            stale_policy: StalePatchPolicy::default(),
            persister: PatchPersister::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn patch_count(mut self, count: usize) -> Self {
        self.patch_count = count;
        self
    }

    pub fn patch_size(mut self, size: u32) -> Self {
        self.patch_size = size;
        self
    }

    /// Fix the rng seed so sampling is reproducible
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn maybe_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Leave every mask of `class` out of the composite
    pub fn exclude_class(mut self, class: ClassId) -> Self {
        self.exclude.push(class);
        self
    }

    pub fn exclude_classes<I>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = ClassId>,
    {
        self.exclude.extend(classes);
        self
    }

    pub fn encoding(mut self, encoding: CompositeEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn stale_policy(mut self, policy: StalePatchPolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// Replace the file writer used when persisting patches
    pub fn writer<W>(mut self, writer: W) -> Self
    where
        W: PatchWriter + 'static,
    {
        self.persister = self.persister.with_writer(writer);
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.persister = self.persister.with_extension(extension);
        self
    }

    /// Share a cancellation token with the sampling and persisting stages
    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> PatchPipeline {
        let compositor = MaskCompositor::new(self.encoding).exclude_all(self.exclude);
        let sampler = PatchSampler::new(self.patch_size).with_cancel(self.cancel.clone());
        let persister = self.persister.with_cancel(self.cancel);

        PatchPipeline::new(
            compositor,
            sampler,
            persister,
            self.patch_count,
            self.seed,
            self.stale_policy,
        )
    }

    /// Class-index pipeline for label export, with the unclassified class left out
    pub fn build_label_export(palette: &ClassPalette) -> PatchPipeline {
        Self::new()
            .exclude_classes(palette.unclassified_id())
            .encoding(CompositeEncoding::ClassIndex(palette.clone()))
            .build()
    }
}

impl Default for PatchPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
