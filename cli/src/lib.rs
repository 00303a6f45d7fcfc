use schemars::JsonSchema;
use segmask::{ClassPalette, MaskManager, MaskManagerCommand, StalePatchPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Segmask(#[from] segmask::SegmaskError),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// A batch job: one source image and the commands to run against it
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SegmaskJob {
    /// Source image (PNG, JPEG, BMP or TIFF)
    pub image: PathBuf,
    /// Mask classes; the built-in Unclassified/Pad/Line/Space set when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<ClassPalette>,
    /// Recipe XML loaded before any other command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<PathBuf>,
    /// Directory the selected patches are written to after the commands ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_dir: Option<PathBuf>,
    /// Label image written after the commands ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_map: Option<PathBuf>,
    #[serde(default)]
    pub stale_policy: StalePatchPolicy,
    #[serde(default)]
    pub commands: Vec<MaskManagerCommand>,
}

impl SegmaskJob {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            palette: None,
            recipe: None,
            patch_dir: None,
            label_map: None,
            stale_policy: StalePatchPolicy::default(),
            commands: Vec::new(),
        }
    }

    /// Load job configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, JobError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, JobError> {
        Ok(toml::from_str(content)?)
    }

    /// Load job configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, JobError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, JobError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, JobError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(JobError::UnsupportedFileFormat),
        }
    }

    pub fn to_toml(&self) -> Result<String, JobError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    pub fn to_json(&self) -> Result<String, JobError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    /// Save the job to a JSON file
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), JobError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Manager with this job's palette, stale policy and image loaded
    pub fn build_manager(&self) -> Result<MaskManager, JobError> {
        let palette = self.palette.clone().unwrap_or_default();
        let mut manager = MaskManager::with_palette(palette).with_stale_policy(self.stale_policy);
        manager.load_image(&self.image)?;
        Ok(manager)
    }

    /// Every command the job runs, in order: recipe load, the listed
    /// commands, then the configured saves.
    pub fn planned_commands(&self) -> Vec<MaskManagerCommand> {
        let mut commands = Vec::with_capacity(self.commands.len() + 3);
        if let Some(path) = &self.recipe {
            commands.push(MaskManagerCommand::LoadRecipe { path: path.clone() });
        }
        commands.extend(self.commands.iter().cloned());
        if let Some(directory) = &self.patch_dir {
            commands.push(MaskManagerCommand::SavePatches { directory: directory.clone() });
        }
        if let Some(path) = &self.label_map {
            commands.push(MaskManagerCommand::SaveLabelMap { path: path.clone() });
        }
        commands
    }
}
