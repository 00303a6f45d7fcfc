use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};
use tracing::{debug, info};

use crate::{
    algorithms::{
        CompositeLayer, DecodeReport, FloodFillSegmenter, MaskCompositor, RefreshReport,
        RleMaskDecoder, SkippedEntry, StalePatchPolicy, encode_mask, snapshot_layers,
    },
    cancel::CancelToken,
    error::{Result, SegmaskError},
    io::{
        image::{load_image, load_image_from_bytes, save_image},
        persist::PersistReport,
        recipe::read_recipe_file,
    },
    pipeline::{PatchPipeline, builder::PatchPipelineBuilder},
    raster::{FrozenBuffer, PixelBuffer, PixelFormat},
    traits::{RecipeSource, RegionSegmenter},
    types::{ClassId, ClassPalette, Color, Coordinate, Mask, MaskClass, MaskId, PatchPoint},
};

#[derive(
    Debug, Clone,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq
)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MaskManagerCommand {
    /// Grow a mask from a seed pixel given in source-image coordinates
    SegmentAtPoint {
        x: i32,
        y: i32,
        #[serde(default)]
        tolerance: Option<u32>,
    },

    /// Grow a mask from a click on a scaled view of the image
    SegmentAtDisplayPoint {
        x: f64,
        y: f64,
        #[schemars(range(min = 0.0))]
        displayed_width: f64,
        #[schemars(range(min = 0.0))]
        displayed_height: f64,
        #[serde(default)]
        tolerance: Option<u32>,
    },

    /// Decode every mask of an XML recipe file
    LoadRecipe { path: PathBuf },

    SetVisibility { mask_id: MaskId, visible: bool },

    /// Move a mask to another class and recolor it
    AssignClass { mask_id: MaskId, class_id: ClassId },

    RemoveMask { mask_id: MaskId },

    /// Replace the patch list with freshly sampled patches
    GeneratePatches {
        #[schemars(range(min = 1))]
        count: usize,
        #[schemars(range(min = 1))]
        patch_size: u32,
        #[serde(default)]
        seed: Option<u64>,
    },

    /// Re-crop mask patches against the current masks
    RefreshPatches {
        #[serde(default)]
        policy: Option<StalePatchPolicy>,
    },

    SetPatchSelection { index: usize, selected: bool },

    SelectAllPatches { selected: bool },

    /// Write the selected patches into a directory
    SavePatches { directory: PathBuf },

    /// Write the class-index label image
    SaveLabelMap { path: PathBuf },
}

impl MaskManagerCommand {
    /// Get the JSON schema for all commands
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(MaskManagerCommand)
    }

    /// Get a list of all available command names
    pub fn command_names() -> &'static [&'static str] {
        <Self as VariantNames>::VARIANTS
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SegmentAtPoint { .. } => "Flood-fill a new mask from a seed pixel in image coordinates",
            Self::SegmentAtDisplayPoint { .. } => "Flood-fill a new mask from a click on a scaled view of the image",
            Self::LoadRecipe { .. } => "Decode the run-length masks of an XML recipe file into hidden masks",
            Self::SetVisibility { .. } => "Show or hide a mask",
            Self::AssignClass { .. } => "Assign a mask to a class and recolor it with the class color",
            Self::RemoveMask { .. } => "Delete a mask",
            Self::GeneratePatches { .. } => "Composite visible masks and sample random image/mask patch pairs",
            Self::RefreshPatches { .. } => "Re-crop the mask side of existing patches from the current composite",
            Self::SetPatchSelection { .. } => "Select or deselect one patch for saving",
            Self::SelectAllPatches { .. } => "Select or deselect every patch",
            Self::SavePatches { .. } => "Write selected patches as x{X}-y{Y}_image / _mask files",
            Self::SaveLabelMap { .. } => "Write a grayscale label image holding each pixel's class index",
        }
    }

    /// Get parameter requirements for the command
    pub fn parameters_info(&self) -> Vec<(&'static str, &'static str, bool)> {
        match self {
            Self::SegmentAtPoint { .. } => vec![
                ("x", "Seed column in source pixels", true),
                ("y", "Seed row in source pixels", true),
                ("tolerance", "Grayscale band half-width (default 10, capped at 255)", false),
            ],
            Self::SegmentAtDisplayPoint { .. } => vec![
                ("x", "Click column in displayed pixels", true),
                ("y", "Click row in displayed pixels", true),
                ("displayed_width", "Width the image is shown at", true),
                ("displayed_height", "Height the image is shown at", true),
                ("tolerance", "Grayscale band half-width (default 10, capped at 255)", false),
            ],
            Self::LoadRecipe { .. } => vec![("path", "Recipe XML file", true)],
            Self::SetVisibility { .. } => vec![
                ("mask_id", "Mask to change", true),
                ("visible", "New visibility", true),
            ],
            Self::AssignClass { .. } => vec![
                ("mask_id", "Mask to change", true),
                ("class_id", "Class from the palette", true),
            ],
            Self::RemoveMask { .. } => vec![("mask_id", "Mask to delete", true)],
            Self::GeneratePatches { .. } => vec![
                ("count", "Number of patches to draw", true),
                ("patch_size", "Side length of each square patch", true),
                ("seed", "Rng seed for reproducible sampling", false),
            ],
            Self::RefreshPatches { .. } => vec![
                ("policy", "retain or clear mask crops that no longer fit", false),
            ],
            Self::SetPatchSelection { .. } => vec![
                ("index", "Position in the patch list", true),
                ("selected", "New selection state", true),
            ],
            Self::SelectAllPatches { .. } => vec![("selected", "New selection state", true)],
            Self::SavePatches { .. } => vec![("directory", "Output directory, created if missing", true)],
            Self::SaveLabelMap { .. } => vec![("path", "Output image path", true)],
        }
    }
}

/// What a command did
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    MaskCreated { id: MaskId, name: String, pixels: usize },
    /// The seed fell outside the image
    NothingSegmented { seed: Coordinate },
    RecipeLoaded { created: Vec<MaskId>, skipped: Vec<SkippedEntry> },
    MaskUpdated { id: MaskId },
    MaskRemoved { id: MaskId },
    PatchesGenerated { count: usize, patch_size: u32 },
    PatchesRefreshed { refreshed: usize, stale: usize },
    SelectionChanged { selected: usize, total: usize },
    PatchesSaved(PersistReport),
    LabelMapSaved { path: PathBuf, labelled_pixels: usize },
}

/// Snapshot of everything a raster-heavy command needs, detached from the manager
enum Job {
    Segment {
        image: FrozenBuffer,
        seed: Coordinate,
        segmenter: Arc<dyn RegionSegmenter>,
        color: Color,
    },
    DecodeRecipe {
        path: PathBuf,
        decoder: RleMaskDecoder,
        cancel: CancelToken,
    },
    Generate {
        image: FrozenBuffer,
        layers: Vec<CompositeLayer>,
        pipeline: PatchPipeline,
    },
    Refresh {
        patches: Vec<PatchPoint>,
        dimensions: (u32, u32),
        layers: Vec<CompositeLayer>,
        pipeline: PatchPipeline,
    },
    Save {
        patches: Vec<PatchPoint>,
        directory: PathBuf,
        pipeline: PatchPipeline,
    },
    SaveLabels {
        dimensions: (u32, u32),
        layers: Vec<CompositeLayer>,
        pipeline: PatchPipeline,
        path: PathBuf,
    },
}

enum JobOutput {
    Segmented {
        seed: Coordinate,
        raster: Option<FrozenBuffer>,
        pixels: usize,
        rle_source: Option<String>,
    },
    Decoded(DecodeReport),
    Generated { patches: Vec<PatchPoint>, patch_size: u32 },
    Refreshed(RefreshReport),
    Saved(PersistReport),
    LabelsSaved { path: PathBuf, labelled_pixels: usize },
}

enum Prepared {
    Done(CommandOutcome),
    Job(Job),
}

impl Job {
    fn run(self) -> Result<JobOutput> {
        match self {
            Job::Segment { image, seed, segmenter, color } => {
                let region = segmenter.segment(&image, seed);
                if region.is_empty() {
                    return Ok(JobOutput::Segmented { seed, raster: None, pixels: 0, rle_source: None });
                }

                let (width, height) = image.dimensions();
                let mut raster = PixelBuffer::new(width, height, PixelFormat::Bgra32);
                let pixels = raster.paint_points(&region, color.opaque().to_argb());
                let rle_source = encode_mask(&raster)
                    .map(|node| serde_json::to_string(&[node]))
                    .transpose()?;

                Ok(JobOutput::Segmented {
                    seed,
                    raster: Some(raster.freeze()),
                    pixels,
                    rle_source,
                })
            }
            Job::DecodeRecipe { path, decoder, cancel } => {
                let entries = read_recipe_file(&path)?;
                Ok(JobOutput::Decoded(decoder.decode_batch(&entries, &cancel)?))
            }
            Job::Generate { image, layers, pipeline } => {
                let run = pipeline.generate(&image, &layers)?;
                Ok(JobOutput::Generated {
                    patches: run.patches,
                    patch_size: pipeline.patch_size(),
                })
            }
            Job::Refresh { patches, dimensions, layers, pipeline } => {
                Ok(JobOutput::Refreshed(pipeline.refresh(&patches, dimensions, &layers)?))
            }
            Job::Save { patches, directory, pipeline } => {
                Ok(JobOutput::Saved(pipeline.persist(&patches, &directory)?))
            }
            Job::SaveLabels { dimensions, layers, pipeline, path } => {
                let labels = pipeline.composite(dimensions, &layers);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                save_image(&labels, &path)?;
                Ok(JobOutput::LabelsSaved {
                    labelled_pixels: labels.covered_count(),
                    path,
                })
            }
        }
    }
}

fn recipe_mask_name(index: usize, guid: Option<&str>) -> String {
    match guid {
        Some(guid) if !guid.is_empty() => {
            let short: String = guid.chars().take(8).collect();
            format!("Mask {short}...")
        }
        _ => format!("Mask {}", index + 1),
    }
}

/// Owns the source image, the masks drawn over it and the sampled patches.
///
/// Every command is validated against the current state before any raster
/// work starts. Heavy commands run on a detached snapshot and their result
/// is applied in one step, so a failed or cancelled command leaves the
/// manager untouched.
#[derive(Clone)]
pub struct MaskManager {
    image: Option<FrozenBuffer>,
    palette: ClassPalette,
    masks: Vec<Mask>,
    patches: Vec<PatchPoint>,
    next_mask_id: u64,
    patch_size: u32,
    stale_policy: StalePatchPolicy,
    segmenter: Arc<dyn RegionSegmenter>,
    cancel: CancelToken,
}

impl MaskManager {
    pub fn new() -> Self {
        Self::with_palette(ClassPalette::default())
    }

    pub fn with_palette(palette: ClassPalette) -> Self {
        Self {
            image: None,
            palette,
            masks: Vec::new(),
            patches: Vec::new(),
            next_mask_id: 1,
            patch_size: 0,
            stale_policy: StalePatchPolicy::default(),
            segmenter: Arc::new(FloodFillSegmenter::default()),
            cancel: CancelToken::new(),
        }
    }

    /// Use a different segmenter for commands that don't override the tolerance
    pub fn with_segmenter<S: RegionSegmenter + 'static>(mut self, segmenter: S) -> Self {
        self.segmenter = Arc::new(segmenter);
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePatchPolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// Load the source image from file
    pub fn load_image<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let image = load_image(path)?;
        self.set_image(image);
        Ok(())
    }

    pub fn load_image_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let image = load_image_from_bytes(bytes)?;
        self.set_image(image);
        Ok(())
    }

    /// Replace the source image. Masks and patches belong to the old image
    /// and are dropped.
    pub fn set_image(&mut self, image: PixelBuffer) {
        info!(dimensions = ?image.dimensions(), format = %image.format(), "source image set");
        self.image = Some(image.freeze());
        self.masks.clear();
        self.patches.clear();
    }

    pub fn image(&self) -> Option<&FrozenBuffer> {
        self.image.as_ref()
    }

    pub fn palette(&self) -> &ClassPalette {
        &self.palette
    }

    pub fn masks(&self) -> &[Mask] {
        &self.masks
    }

    pub fn mask(&self, id: MaskId) -> Option<&Mask> {
        self.masks.iter().find(|mask| mask.id == id)
    }

    pub fn patches(&self) -> &[PatchPoint] {
        &self.patches
    }

    /// Token that aborts the running (or next) batch when cancelled.
    /// It is re-armed once that batch returns.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Color composite of every visible, classified mask
    pub fn composite_preview(&self) -> Result<FrozenBuffer> {
        let image = self.require_image()?;
        let layers = snapshot_layers(&self.masks, &self.palette);
        Ok(MaskCompositor::default().composite(image.dimensions(), &layers))
    }

    /// Class-index composite, unclassified masks left out
    pub fn label_map(&self) -> Result<FrozenBuffer> {
        let image = self.require_image()?;
        let layers = snapshot_layers(&self.masks, &self.palette);
        Ok(PatchPipelineBuilder::build_label_export(&self.palette).composite(image.dimensions(), &layers))
    }

    /// Decode already-parsed recipe entries into new hidden masks
    pub fn load_recipe_entries<S: RecipeSource>(&mut self, sources: &[S]) -> Result<CommandOutcome> {
        let decoder = self.recipe_decoder()?;
        let report = decoder.decode_batch(sources, &self.cancel);
        self.cancel.reset();
        self.apply(JobOutput::Decoded(report?))
    }

    pub fn execute(&mut self, command: MaskManagerCommand) -> Result<CommandOutcome> {
        match self.prepare(command)? {
            Prepared::Done(outcome) => Ok(outcome),
            Prepared::Job(job) => {
                let output = job.run();
                self.cancel.reset();
                self.apply(output?)
            }
        }
    }

    /// Like [`execute`](Self::execute), with the raster work moved onto
    /// tokio's blocking pool.
    pub async fn execute_async(&mut self, command: MaskManagerCommand) -> Result<CommandOutcome> {
        match self.prepare(command)? {
            Prepared::Done(outcome) => Ok(outcome),
            Prepared::Job(job) => {
                let output = tokio::task::spawn_blocking(move || job.run()).await;
                self.cancel.reset();
                self.apply(output??)
            }
        }
    }

    fn require_image(&self) -> Result<&FrozenBuffer> {
        let image = self.image.as_ref().ok_or(SegmaskError::NoImageLoaded)?;
        if image.is_empty() {
            let (width, height) = image.dimensions();
            return Err(SegmaskError::EmptyImage { width, height });
        }
        Ok(image)
    }

    fn require_class(&self) -> Result<&MaskClass> {
        self.palette.default_class().ok_or(SegmaskError::NoMaskClasses)
    }

    fn mask_mut(&mut self, id: MaskId) -> Result<&mut Mask> {
        self.masks
            .iter_mut()
            .find(|mask| mask.id == id)
            .ok_or(SegmaskError::UnknownMask(id))
    }

    fn recipe_decoder(&self) -> Result<RleMaskDecoder> {
        let (width, height) = self.require_image()?.dimensions();
        let color = self.require_class()?.color;
        Ok(RleMaskDecoder::new(width, height, color))
    }

    fn pipeline(&self, patch_count: usize, patch_size: u32, seed: Option<u64>) -> PatchPipeline {
        PatchPipelineBuilder::new()
            .patch_count(patch_count)
            .patch_size(patch_size)
            .maybe_seed(seed)
            .stale_policy(self.stale_policy)
            .cancel(self.cancel.clone())
            .build()
    }

    fn segment_job(&self, seed: Coordinate, tolerance: Option<u32>) -> Result<Prepared> {
        let image = self.require_image()?.clone();
        let color = self.require_class()?.color;
        let segmenter = match tolerance {
            Some(tolerance) => Arc::new(FloodFillSegmenter::new(tolerance)) as Arc<dyn RegionSegmenter>,
            None => Arc::clone(&self.segmenter),
        };
        Ok(Prepared::Job(Job::Segment { image, seed, segmenter, color }))
    }

    fn selection_changed(&self) -> CommandOutcome {
        CommandOutcome::SelectionChanged {
            selected: self.patches.iter().filter(|patch| patch.selected).count(),
            total: self.patches.len(),
        }
    }

    /// Validate a command and either run it in place (cheap state edits) or
    /// package the raster work as a detached job.
    fn prepare(&mut self, command: MaskManagerCommand) -> Result<Prepared> {
        debug!(command = %command, "preparing command");
        match command {
            MaskManagerCommand::SegmentAtPoint { x, y, tolerance } => {
                self.segment_job(Coordinate::new(x, y), tolerance)
            }
            MaskManagerCommand::SegmentAtDisplayPoint {
                x,
                y,
                displayed_width,
                displayed_height,
                tolerance,
            } => {
                let source = self.require_image()?.dimensions();
                if !x.is_finite() || !y.is_finite() {
                    return Err(SegmaskError::InvalidDisplayPoint { x, y });
                }
                let seed = Coordinate::from_display_point((x, y), (displayed_width, displayed_height), source)
                    .ok_or(SegmaskError::InvalidDisplaySize {
                        width: displayed_width,
                        height: displayed_height,
                    })?;
                self.segment_job(seed, tolerance)
            }
            MaskManagerCommand::LoadRecipe { path } => Ok(Prepared::Job(Job::DecodeRecipe {
                path,
                decoder: self.recipe_decoder()?,
                cancel: self.cancel.clone(),
            })),
            MaskManagerCommand::SetVisibility { mask_id, visible } => {
                self.mask_mut(mask_id)?.visible = visible;
                Ok(Prepared::Done(CommandOutcome::MaskUpdated { id: mask_id }))
            }
            MaskManagerCommand::AssignClass { mask_id, class_id } => {
                let color = self
                    .palette
                    .get(class_id)
                    .ok_or(SegmaskError::UnknownClass(class_id))?
                    .color;
                let mask = self.mask_mut(mask_id)?;
                mask.class = Some(class_id);
                mask.edit_raster(|raster| raster.recolor_covered(color.opaque().to_argb()));
                Ok(Prepared::Done(CommandOutcome::MaskUpdated { id: mask_id }))
            }
            MaskManagerCommand::RemoveMask { mask_id } => {
                let index = self
                    .masks
                    .iter()
                    .position(|mask| mask.id == mask_id)
                    .ok_or(SegmaskError::UnknownMask(mask_id))?;
                self.masks.remove(index);
                Ok(Prepared::Done(CommandOutcome::MaskRemoved { id: mask_id }))
            }
            MaskManagerCommand::GeneratePatches { count, patch_size, seed } => {
                let image = self.require_image()?.clone();
                Ok(Prepared::Job(Job::Generate {
                    image,
                    layers: snapshot_layers(&self.masks, &self.palette),
                    pipeline: self.pipeline(count, patch_size, seed),
                }))
            }
            MaskManagerCommand::RefreshPatches { policy } => {
                let dimensions = self.require_image()?.dimensions();
                let pipeline = PatchPipelineBuilder::new()
                    .patch_size(self.patch_size)
                    .stale_policy(policy.unwrap_or(self.stale_policy))
                    .cancel(self.cancel.clone())
                    .build();
                Ok(Prepared::Job(Job::Refresh {
                    patches: self.patches.clone(),
                    dimensions,
                    layers: snapshot_layers(&self.masks, &self.palette),
                    pipeline,
                }))
            }
            MaskManagerCommand::SetPatchSelection { index, selected } => {
                let len = self.patches.len();
                let patch = self
                    .patches
                    .get_mut(index)
                    .ok_or(SegmaskError::PatchIndexOutOfRange { index, len })?;
                patch.selected = selected;
                Ok(Prepared::Done(self.selection_changed()))
            }
            MaskManagerCommand::SelectAllPatches { selected } => {
                for patch in &mut self.patches {
                    patch.selected = selected;
                }
                Ok(Prepared::Done(self.selection_changed()))
            }
            MaskManagerCommand::SavePatches { directory } => Ok(Prepared::Job(Job::Save {
                patches: self.patches.clone(),
                directory,
                pipeline: self.pipeline(0, self.patch_size, None),
            })),
            MaskManagerCommand::SaveLabelMap { path } => {
                let dimensions = self.require_image()?.dimensions();
                Ok(Prepared::Job(Job::SaveLabels {
                    dimensions,
                    layers: snapshot_layers(&self.masks, &self.palette),
                    pipeline: PatchPipelineBuilder::build_label_export(&self.palette),
                    path,
                }))
            }
        }
    }

    fn allocate_id(&mut self) -> MaskId {
        let id = MaskId(self.next_mask_id);
        self.next_mask_id += 1;
        id
    }

    fn apply(&mut self, output: JobOutput) -> Result<CommandOutcome> {
        let outcome = match output {
            JobOutput::Segmented { seed, raster: None, .. } => {
                debug!(seed = %seed, "seed outside the image, no mask created");
                CommandOutcome::NothingSegmented { seed }
            }
            JobOutput::Segmented { seed, raster: Some(raster), pixels, rle_source } => {
                let id = self.allocate_id();
                let name = format!("GV Mask {}", self.masks.len() + 1);
                let class = self.require_class()?.id;

                let mut mask = Mask::new(id, name.clone(), raster).with_class(Some(class));
                mask.rle_source = rle_source;
                self.masks.push(mask);

                info!(%id, %seed, pixels, "mask created from seed");
                CommandOutcome::MaskCreated { id, name, pixels }
            }
            JobOutput::Decoded(report) => {
                let class = self.require_class()?.id;
                let mut created = Vec::with_capacity(report.decoded.len());

                for decoded in report.decoded {
                    let id = self.allocate_id();
                    let name = recipe_mask_name(decoded.index, decoded.entry.guid.as_deref());
                    let mut mask = Mask::new(id, name, decoded.raster).with_class(Some(class));
                    mask.visible = false;
                    mask.rle_source = Some(serde_json::to_string(&decoded.entry.nodes)?);
                    self.masks.push(mask);
                    created.push(id);
                }

                info!(created = created.len(), skipped = report.skipped.len(), "recipe masks added");
                CommandOutcome::RecipeLoaded {
                    created,
                    skipped: report.skipped,
                }
            }
            JobOutput::Generated { patches, patch_size } => {
                let count = patches.len();
                self.patches = patches;
                self.patch_size = patch_size;
                CommandOutcome::PatchesGenerated { count, patch_size }
            }
            JobOutput::Refreshed(report) => {
                let (refreshed, stale) = (report.refreshed, report.stale);
                report.apply(&mut self.patches);
                CommandOutcome::PatchesRefreshed { refreshed, stale }
            }
            JobOutput::Saved(report) => CommandOutcome::PatchesSaved(report),
            JobOutput::LabelsSaved { path, labelled_pixels } => {
                info!(path = %path.display(), labelled_pixels, "label map saved");
                CommandOutcome::LabelMapSaved { path, labelled_pixels }
            }
        };
        Ok(outcome)
    }
}

impl Default for MaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{RecipeEntry, RecipeMaskNode, Scanline};
    use strum::IntoEnumIterator;

    /// 10x10 gray image with a bright 4x4 square at (2, 2)
    fn square_image() -> PixelBuffer {
        let mut image = PixelBuffer::new(10, 10, PixelFormat::Gray8);
        for y in 2..6 {
            for x in 2..6 {
                image.write_pixel(x, y, &[200]);
            }
        }
        image
    }

    fn manager_with_image() -> MaskManager {
        let mut manager = MaskManager::new();
        manager.set_image(square_image());
        manager
    }

    fn segment(manager: &mut MaskManager, x: i32, y: i32) -> MaskId {
        match manager
            .execute(MaskManagerCommand::SegmentAtPoint { x, y, tolerance: None })
            .unwrap()
        {
            CommandOutcome::MaskCreated { id, .. } => id,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn line_class(manager: &MaskManager) -> ClassId {
        manager.palette().by_name("Line").unwrap().id
    }

    #[test]
    fn test_commands_require_an_image() {
        let mut manager = MaskManager::new();
        let result = manager.execute(MaskManagerCommand::SegmentAtPoint { x: 0, y: 0, tolerance: None });
        assert!(matches!(result, Err(SegmaskError::NoImageLoaded)));

        let result = manager.execute(MaskManagerCommand::GeneratePatches { count: 1, patch_size: 2, seed: None });
        assert!(matches!(result, Err(SegmaskError::NoImageLoaded)));
    }

    #[test]
    fn test_zero_size_image_is_rejected() {
        let mut manager = MaskManager::new();
        manager.set_image(PixelBuffer::new(0, 4, PixelFormat::Gray8));
        let result = manager.execute(MaskManagerCommand::SegmentAtPoint { x: 0, y: 0, tolerance: None });
        assert!(matches!(result, Err(SegmaskError::EmptyImage { width: 0, height: 4 })));
    }

    #[test]
    fn test_empty_palette_is_rejected() {
        let mut manager = MaskManager::with_palette(ClassPalette::new(Vec::new()));
        manager.set_image(square_image());
        let result = manager.execute(MaskManagerCommand::SegmentAtPoint { x: 3, y: 3, tolerance: None });
        assert!(matches!(result, Err(SegmaskError::NoMaskClasses)));
    }

    #[test]
    fn test_segment_creates_unclassified_mask() {
        let mut manager = manager_with_image();
        let outcome = manager
            .execute(MaskManagerCommand::SegmentAtPoint { x: 3, y: 3, tolerance: None })
            .unwrap();

        let CommandOutcome::MaskCreated { id, name, pixels } = outcome else {
            panic!("expected a new mask");
        };
        assert_eq!(name, "GV Mask 1");
        assert_eq!(pixels, 16);

        let mask = manager.mask(id).unwrap();
        assert_eq!(mask.class, manager.palette().unclassified_id());
        assert!(mask.visible);
        assert_eq!(mask.raster.dimensions(), (10, 10));
        assert_eq!(mask.raster.covered_count(), 16);

        let nodes: Vec<RecipeMaskNode> = serde_json::from_str(mask.rle_source.as_deref().unwrap()).unwrap();
        assert_eq!((nodes[0].bound_left, nodes[0].bound_top), (2, 2));
    }

    #[test]
    fn test_segment_outside_image_creates_nothing() {
        let mut manager = manager_with_image();
        let outcome = manager
            .execute(MaskManagerCommand::SegmentAtPoint { x: 40, y: 1, tolerance: None })
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::NothingSegmented { .. }));
        assert!(manager.masks().is_empty());
    }

    #[test]
    fn test_display_point_is_scaled_to_source() {
        let mut manager = manager_with_image();
        // Shown at 5x5, so (1.5, 1.5) lands on source pixel (3, 3) inside the square.
        let outcome = manager
            .execute(MaskManagerCommand::SegmentAtDisplayPoint {
                x: 1.5,
                y: 1.5,
                displayed_width: 5.0,
                displayed_height: 5.0,
                tolerance: Some(0),
            })
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::MaskCreated { pixels: 16, .. }));

        let result = manager.execute(MaskManagerCommand::SegmentAtDisplayPoint {
            x: 1.0,
            y: 1.0,
            displayed_width: 0.0,
            displayed_height: 5.0,
            tolerance: None,
        });
        assert!(matches!(result, Err(SegmaskError::InvalidDisplaySize { .. })));

        let result = manager.execute(MaskManagerCommand::SegmentAtDisplayPoint {
            x: f64::NAN,
            y: 1.0,
            displayed_width: 5.0,
            displayed_height: 5.0,
            tolerance: None,
        });
        assert!(matches!(result, Err(SegmaskError::InvalidDisplayPoint { .. })));
        assert_eq!(manager.masks().len(), 1);
    }

    #[test]
    fn test_tolerance_above_byte_range_covers_everything() {
        let command: MaskManagerCommand = serde_json::from_str(
            r#"{"type": "segment_at_point", "params": {"x": 0, "y": 0, "tolerance": 300}}"#,
        )
        .unwrap();
        assert_eq!(command, MaskManagerCommand::SegmentAtPoint { x: 0, y: 0, tolerance: Some(300) });

        let mut manager = manager_with_image();
        let outcome = manager.execute(command).unwrap();
        assert!(matches!(outcome, CommandOutcome::MaskCreated { pixels: 100, .. }));
    }

    #[test]
    fn test_recipe_masks_start_hidden() {
        let mut manager = manager_with_image();
        let entries = vec![
            RecipeEntry {
                guid: Some("0f8fad5b-d9cb-469f".to_string()),
                nodes: vec![RecipeMaskNode {
                    bound_top: 1,
                    bound_left: 1,
                    scanlines: vec![Scanline { x: 0, y: 0, length: 3 }],
                }],
            },
            RecipeEntry {
                guid: None,
                nodes: Vec::new(),
            },
        ];

        let outcome = manager.load_recipe_entries(&entries).unwrap();
        let CommandOutcome::RecipeLoaded { created, skipped } = outcome else {
            panic!("expected recipe outcome");
        };
        assert_eq!(created.len(), 2);
        assert!(skipped.is_empty());

        let first = manager.mask(created[0]).unwrap();
        assert_eq!(first.name, "Mask 0f8fad5b...");
        assert!(!first.visible);
        assert_eq!(first.raster.covered_count(), 3);
        assert_eq!(manager.mask(created[1]).unwrap().name, "Mask 2");
    }

    #[test]
    fn test_load_recipe_file_reports_skipped_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipe.xml");
        fs::write(
            &path,
            r#"<Recipe>
                <RecipeType_Mask><Guid>aaaaaaaa-1</Guid><Mask><p_nBoundTop>0</p_nBoundTop><p_nBoundLeft>0</p_nBoundLeft>
                    <RecipeType_PointLine><StartPoint><X>0</X><Y>0</Y></StartPoint><Length>2</Length></RecipeType_PointLine>
                </Mask></RecipeType_Mask>
                <RecipeType_Mask><Guid>bbbbbbbb-2</Guid><Mask><p_nBoundTop>x</p_nBoundTop><p_nBoundLeft>0</p_nBoundLeft></Mask></RecipeType_Mask>
            </Recipe>"#,
        )
        .unwrap();

        let mut manager = manager_with_image();
        let outcome = manager.execute(MaskManagerCommand::LoadRecipe { path }).unwrap();
        let CommandOutcome::RecipeLoaded { created, skipped } = outcome else {
            panic!("expected recipe outcome");
        };
        assert_eq!(created.len(), 1);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].index, 1);
        assert_eq!(skipped[0].guid.as_deref(), Some("bbbbbbbb-2"));
    }

    #[test]
    fn test_assign_class_recolors_mask() {
        let mut manager = manager_with_image();
        let id = segment(&mut manager, 3, 3);
        let line = line_class(&manager);
        let before = manager.mask(id).unwrap().raster.clone();

        manager
            .execute(MaskManagerCommand::AssignClass { mask_id: id, class_id: line })
            .unwrap();

        let mask = manager.mask(id).unwrap();
        let color = manager.palette().get(line).unwrap().color;
        assert_eq!(mask.class, Some(line));
        assert_eq!(mask.raster.argb_at(3, 3), color.opaque().to_argb());
        assert_eq!(mask.raster.argb_at(0, 0), 0);
        assert_ne!(before.argb_at(3, 3), mask.raster.argb_at(3, 3));
    }

    #[test]
    fn test_unknown_ids_are_rejected() {
        let mut manager = manager_with_image();
        let id = segment(&mut manager, 3, 3);

        let result = manager.execute(MaskManagerCommand::AssignClass { mask_id: id, class_id: ClassId(42) });
        assert!(matches!(result, Err(SegmaskError::UnknownClass(ClassId(42)))));

        let result = manager.execute(MaskManagerCommand::RemoveMask { mask_id: MaskId(999) });
        assert!(matches!(result, Err(SegmaskError::UnknownMask(MaskId(999)))));

        manager.execute(MaskManagerCommand::RemoveMask { mask_id: id }).unwrap();
        assert!(manager.masks().is_empty());
    }

    #[test]
    fn test_generate_and_select_patches() {
        let mut manager = manager_with_image();
        manager
            .execute(MaskManagerCommand::GeneratePatches { count: 5, patch_size: 4, seed: Some(1) })
            .unwrap();
        assert_eq!(manager.patches().len(), 5);

        let outcome = manager
            .execute(MaskManagerCommand::SetPatchSelection { index: 1, selected: false })
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::SelectionChanged { selected: 4, total: 5 }));

        let result = manager.execute(MaskManagerCommand::SetPatchSelection { index: 5, selected: true });
        assert!(matches!(result, Err(SegmaskError::PatchIndexOutOfRange { index: 5, len: 5 })));

        let outcome = manager
            .execute(MaskManagerCommand::SelectAllPatches { selected: false })
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::SelectionChanged { selected: 0, total: 5 }));
    }

    #[test]
    fn test_refresh_follows_visibility() {
        let mut manager = manager_with_image();
        let id = segment(&mut manager, 3, 3);
        manager
            .execute(MaskManagerCommand::GeneratePatches { count: 6, patch_size: 8, seed: Some(4) })
            .unwrap();
        let covered_before: usize = manager
            .patches()
            .iter()
            .map(|patch| patch.mask_patch.as_ref().unwrap().covered_count())
            .sum();
        assert!(covered_before > 0);

        manager
            .execute(MaskManagerCommand::SetVisibility { mask_id: id, visible: false })
            .unwrap();
        let outcome = manager
            .execute(MaskManagerCommand::RefreshPatches { policy: None })
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::PatchesRefreshed { refreshed: 6, stale: 0 }));

        for patch in manager.patches() {
            assert_eq!(patch.mask_patch.as_ref().unwrap().covered_count(), 0);
        }
    }

    #[test]
    fn test_save_selected_patches() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_with_image();
        manager
            .execute(MaskManagerCommand::GeneratePatches { count: 5, patch_size: 3, seed: Some(2) })
            .unwrap();
        manager
            .execute(MaskManagerCommand::SetPatchSelection { index: 0, selected: false })
            .unwrap();
        manager
            .execute(MaskManagerCommand::SetPatchSelection { index: 3, selected: false })
            .unwrap();

        let outcome = manager
            .execute(MaskManagerCommand::SavePatches { directory: dir.path().to_path_buf() })
            .unwrap();
        let CommandOutcome::PatchesSaved(report) = outcome else {
            panic!("expected save outcome");
        };
        assert_eq!(report.files_written, 6);
        assert_eq!(report.patches_saved, 3);
    }

    #[test]
    fn test_label_map_holds_class_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels").join("final.png");
        let mut manager = manager_with_image();
        let id = segment(&mut manager, 3, 3);
        let line = line_class(&manager);

        // Unclassified masks are not part of the export.
        assert_eq!(manager.label_map().unwrap().covered_count(), 0);

        manager
            .execute(MaskManagerCommand::AssignClass { mask_id: id, class_id: line })
            .unwrap();
        let outcome = manager
            .execute(MaskManagerCommand::SaveLabelMap { path: path.clone() })
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::LabelMapSaved { labelled_pixels: 16, .. }));

        let saved = load_image(&path).unwrap();
        assert_eq!(saved.format(), PixelFormat::Gray8);
        assert_eq!(saved.gray_at(3, 3), 2);
        assert_eq!(saved.gray_at(0, 0), 0);
    }

    #[test]
    fn test_label_map_with_background_listed_last() {
        let palette = ClassPalette::new(vec![
            MaskClass::new(7, "Via", Color::rgb(0, 200, 0)),
            MaskClass::new(0, crate::types::UNCLASSIFIED, Color::rgb(0x80, 0x80, 0x80)),
        ]);
        let mut manager = MaskManager::with_palette(palette);
        manager.set_image(square_image());
        let id = segment(&mut manager, 3, 3);

        manager
            .execute(MaskManagerCommand::AssignClass { mask_id: id, class_id: ClassId(7) })
            .unwrap();
        let labels = manager.label_map().unwrap();
        assert_eq!(labels.gray_at(3, 3), 1);
        assert_eq!(labels.gray_at(0, 0), 0);
        assert_eq!(labels.covered_count(), 16);
    }

    #[test]
    fn test_cancelled_batch_applies_nothing() {
        let mut manager = manager_with_image();
        let cancel = manager.cancel_token();
        cancel.cancel();

        let result = manager.execute(MaskManagerCommand::GeneratePatches { count: 5, patch_size: 2, seed: Some(0) });
        assert!(matches!(result, Err(SegmaskError::Cancelled)));
        assert!(manager.patches().is_empty());

        // The token is re-armed for the next batch.
        assert!(!cancel.is_cancelled());
        manager
            .execute(MaskManagerCommand::GeneratePatches { count: 5, patch_size: 2, seed: Some(0) })
            .unwrap();
        assert_eq!(manager.patches().len(), 5);
    }

    #[tokio::test]
    async fn test_execute_async_matches_sync() {
        let mut sync_manager = manager_with_image();
        let mut async_manager = manager_with_image();
        let command = MaskManagerCommand::GeneratePatches { count: 7, patch_size: 3, seed: Some(12) };

        sync_manager.execute(command.clone()).unwrap();
        async_manager.execute_async(command).await.unwrap();

        let sync: Vec<_> = sync_manager.patches().iter().map(|p| p.coordinate).collect();
        let async_: Vec<_> = async_manager.patches().iter().map(|p| p.coordinate).collect();
        assert_eq!(sync, async_);
    }

    #[tokio::test]
    async fn test_execute_async_segments() {
        let mut manager = manager_with_image();
        let outcome = manager
            .execute_async(MaskManagerCommand::SegmentAtPoint { x: 0, y: 0, tolerance: Some(0) })
            .await
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::MaskCreated { pixels: 84, .. }));
    }

    #[test]
    fn test_command_serialization() {
        let command: MaskManagerCommand = serde_json::from_str(
            r#"{"type": "generate_patches", "params": {"count": 10, "patch_size": 64}}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            MaskManagerCommand::GeneratePatches { count: 10, patch_size: 64, seed: None }
        );
        assert_eq!(command.to_string(), "generate_patches");
    }

    #[test]
    fn test_command_catalogue() {
        let names = MaskManagerCommand::command_names();
        assert!(names.contains(&"segment_at_point"));
        assert!(names.contains(&"save_label_map"));
        assert_eq!(names.len(), MaskManagerCommand::iter().count());

        for command in MaskManagerCommand::iter() {
            assert!(!command.description().is_empty());
        }

        let schema = serde_json::to_string(&MaskManagerCommand::schema()).unwrap();
        assert!(schema.contains("refresh_patches"));
    }
}
