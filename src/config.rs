//! Pipeline configuration.
//!
//! Matches the `audio-diffusion-256` defaults: 256x256 mel images at
//! 22050 Hz with a 1000-step linear DDPM schedule. Every field may be
//! omitted from a JSON file; missing fields keep their defaults.

use std::path::Path;

use serde::Deserialize;

use crate::Result;
use crate::audio::mel::MelConfig;
use crate::scheduler::SchedulerConfig;

/// Top-level configuration: spectrogram codec plus noise schedule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioDiffusionConfig {
    #[serde(default)]
    pub mel: MelConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl AudioDiffusionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{BetaSchedule, SchedulerKind};

    #[test]
    fn test_default_config() {
        let cfg = AudioDiffusionConfig::default();
        assert_eq!(cfg.mel.x_res, 256);
        assert_eq!(cfg.mel.y_res, 256);
        assert_eq!(cfg.mel.sample_rate, 22050);
        assert_eq!(cfg.mel.hop_length, 512);
        assert_eq!(cfg.mel.n_iter, 32);
        assert_eq!(cfg.scheduler.num_train_timesteps, 1000);
        assert_eq!(cfg.scheduler.kind, SchedulerKind::Ddpm);
    }

    #[test]
    fn test_partial_override() {
        let cfg = AudioDiffusionConfig::from_json_str(
            r#"{
                "mel": { "x_res": 64, "y_res": 64, "hop_length": 1024 },
                "scheduler": { "kind": "ddim", "beta_schedule": "scaled_linear" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.mel.x_res, 64);
        assert_eq!(cfg.mel.hop_length, 1024);
        assert_eq!(cfg.mel.n_fft, 2048);
        assert_eq!(cfg.scheduler.kind, SchedulerKind::Ddim);
        assert_eq!(cfg.scheduler.beta_schedule, BetaSchedule::ScaledLinear);
        assert_eq!(cfg.scheduler.num_train_timesteps, 1000);
    }

    #[test]
    fn test_empty_object_is_default() {
        let cfg = AudioDiffusionConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.mel, MelConfig::default());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(matches!(
            AudioDiffusionConfig::from_json_str(r#"{"mel": {"x_res": "wide"}}"#),
            Err(crate::Error::Json(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"mel": {"top_db": 60.0}}"#).unwrap();
        let cfg = AudioDiffusionConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.mel.top_db, 60.0);
        assert!(AudioDiffusionConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
