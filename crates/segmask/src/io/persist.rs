use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    error::Result,
    io::image::ImageFileWriter,
    raster::PixelBuffer,
    traits::PatchWriter,
    types::PatchPoint,
};

/// A single file that could not be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistReport {
    pub files_written: usize,
    /// Patches whose image file was written
    pub patches_saved: usize,
    pub failures: Vec<PersistFailure>,
}

/// Writes selected patch pairs as `x{X}-y{Y}_image.<ext>` / `x{X}-y{Y}_mask.<ext>`.
///
/// Patches are written in list order, so patches sharing a coordinate
/// overwrite each other and the last one wins.
#[derive(Clone)]
pub struct PatchPersister {
    writer: Arc<dyn PatchWriter>,
    extension: String,
    cancel: CancelToken,
}

impl std::fmt::Debug for PatchPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchPersister")
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}

impl Default for PatchPersister {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchPersister {
    pub fn new() -> Self {
        Self {
            writer: Arc::new(ImageFileWriter),
            extension: "png".to_string(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_writer<W: PatchWriter + 'static>(mut self, writer: W) -> Self {
        self.writer = Arc::new(writer);
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    fn write_one(&self, buffer: &PixelBuffer, path: PathBuf, report: &mut PersistReport) -> bool {
        match self.writer.write(buffer, &path) {
            Ok(()) => {
                debug!(path = %path.display(), "patch file written");
                report.files_written += 1;
                true
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to write patch file");
                report.failures.push(PersistFailure {
                    path,
                    reason: err.to_string(),
                });
                false
            }
        }
    }

    /// Write every selected patch into `directory`, creating it if needed.
    ///
    /// Per-file errors are tallied in the report. Failing to create the
    /// directory, or cancellation, aborts the whole call.
    pub fn persist<P: AsRef<Path>>(&self, patches: &[PatchPoint], directory: P) -> Result<PersistReport> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;

        let mut report = PersistReport::default();
        for patch in patches.iter().filter(|patch| patch.selected) {
            self.cancel.check()?;

            let base = patch.base_name();
            let image_path = directory.join(format!("{base}_image.{}", self.extension));
            if self.write_one(&patch.image_patch, image_path, &mut report) {
                report.patches_saved += 1;
            }

            if let Some(mask) = &patch.mask_patch {
                let mask_path = directory.join(format!("{base}_mask.{}", self.extension));
                self.write_one(mask, mask_path, &mut report);
            }
        }

        info!(
            directory = %directory.display(),
            files = report.files_written,
            patches = report.patches_saved,
            failures = report.failures.len(),
            "patches persisted"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::SegmaskError,
        raster::PixelFormat,
        types::Coordinate,
    };

    fn patch(x: i32, y: i32, selected: bool) -> PatchPoint {
        let image = PixelBuffer::new(4, 4, PixelFormat::Gray8).freeze();
        let mut mask = PixelBuffer::new(4, 4, PixelFormat::Bgra32);
        mask.put_argb(1, 1, 0xFF00_FF00);
        let mut patch = PatchPoint::new(Coordinate::new(x, y), image, mask.freeze());
        patch.selected = selected;
        patch
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_only_selected_patches_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let patches = vec![
            patch(0, 0, true),
            patch(1, 0, false),
            patch(2, 0, true),
            patch(3, 0, false),
            patch(4, 0, true),
        ];

        let report = PatchPersister::new().persist(&patches, dir.path()).unwrap();

        assert_eq!(report.files_written, 6);
        assert_eq!(report.patches_saved, 3);
        assert!(report.failures.is_empty());
        assert_eq!(
            file_names(dir.path()),
            vec![
                "x0-y0_image.png",
                "x0-y0_mask.png",
                "x2-y0_image.png",
                "x2-y0_mask.png",
                "x4-y0_image.png",
                "x4-y0_mask.png",
            ]
        );
    }

    #[test]
    fn test_missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out").join("patches");

        let report = PatchPersister::new().persist(&[patch(5, 6, true)], &nested).unwrap();
        assert_eq!(report.files_written, 2);
        assert!(nested.join("x5-y6_mask.png").exists());
    }

    #[test]
    fn test_patch_without_mask_writes_image_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut bare = patch(1, 2, true);
        bare.mask_patch = None;

        let report = PatchPersister::new().persist(&[bare], dir.path()).unwrap();
        assert_eq!(report.files_written, 1);
        assert_eq!(file_names(dir.path()), vec!["x1-y2_image.png"]);
    }

    struct RejectMasks;

    impl PatchWriter for RejectMasks {
        fn write(&self, _buffer: &PixelBuffer, path: &Path) -> Result<()> {
            if path.to_string_lossy().contains("_mask") {
                return Err(SegmaskError::InvalidBuffer("disk full".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_failures_are_tallied_and_writing_continues() {
        let dir = tempfile::tempdir().unwrap();
        let patches = vec![patch(0, 0, true), patch(1, 1, true)];

        let report = PatchPersister::new()
            .with_writer(RejectMasks)
            .persist(&patches, dir.path())
            .unwrap();

        assert_eq!(report.files_written, 2);
        assert_eq!(report.patches_saved, 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].reason.contains("disk full"));
        assert!(report.failures[1].path.ends_with("x1-y1_mask.png"));
    }

    #[test]
    fn test_cancelled_persist() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = PatchPersister::new()
            .with_cancel(cancel)
            .persist(&[patch(0, 0, true)], dir.path());
        assert!(matches!(result, Err(SegmaskError::Cancelled)));
    }
}
