//! Pipeline configuration

use crate::error::MediaError;
use crate::transcode::QualityPreset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on the paired video length, in seconds.
    pub max_duration_secs: f64,
    /// JPEG quality of the still, 1-100.
    pub jpeg_quality: u8,
    pub quality_preset: QualityPreset,
    pub scratch_dir: PathBuf,
    pub scratch_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 3.0, // Paired video playback is short-lived
            jpeg_quality: 90,
            quality_preset: QualityPreset::Highest,
            scratch_dir: std::env::temp_dir(),
            scratch_prefix: "livePhoto_".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| MediaError::InvalidInput(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MediaError> {
        self.max_duration()?;
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(MediaError::InvalidInput(format!(
                "jpeg_quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    pub fn max_duration(&self) -> Result<Duration, MediaError> {
        let secs = self.max_duration_secs;
        match Duration::try_from_secs_f64(secs) {
            Ok(max) if !max.is_zero() => Ok(max),
            _ => Err(MediaError::InvalidInput(format!(
                "max_duration_secs must be a positive number of seconds, got {}",
                secs
            ))),
        }
    }
}
