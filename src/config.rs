// Settings - engine, analysis and mixing parameters in one file
//
// Stored as RON by default; a `.json` extension switches to JSON. Missing
// fields fall back to their defaults, so older files keep loading.

use crate::analysis::hold::HoldSettings;
use crate::audio::mixer::MixSettings;
use crate::audio::processing::TakeConditioning;
use crate::audio::transport::EngineConfig;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),

    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub hold: HoldSettings,
    pub mix: MixSettings,
    pub conditioning: TakeConditioning,
    /// A note counts as accurate when its median error is within this many cents
    pub accuracy_threshold_cents: f64,
    /// Where new takes are written
    pub recordings_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            hold: HoldSettings::default(),
            mix: MixSettings::default(),
            conditioning: TakeConditioning::default(),
            accuracy_threshold_cents: 50.0,
            recordings_dir: default_recordings_dir(),
        }
    }
}

/// `<local data dir>/crescendo/takes`, or the temp dir when there is none
pub fn default_recordings_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("crescendo")
        .join("takes")
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

impl Settings {
    pub fn from_ron_str(data: &str) -> Result<Self, ConfigError> {
        let settings: Settings = ron::from_str(data)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, PrettyConfig::default())?)
    }

    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(data)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate a settings file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let settings = if is_json(path) {
            Self::from_json_str(&data)?
        } else {
            Self::from_ron_str(&data)?
        };
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let data = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            self.to_ron_string()?
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(self.mix.headroom > 0.0 && self.mix.headroom <= 1.0) {
            return invalid(format!("mix headroom {} must be in (0, 1]", self.mix.headroom));
        }
        if !(self.hold.cents_threshold >= 0.0) {
            return invalid(format!(
                "cents threshold {} must not be negative",
                self.hold.cents_threshold
            ));
        }
        if !(self.hold.gap_factor > 0.0) {
            return invalid(format!("gap factor {} must be positive", self.hold.gap_factor));
        }
        if !(self.accuracy_threshold_cents >= 0.0) {
            return invalid(format!(
                "accuracy threshold {} must not be negative",
                self.accuracy_threshold_cents
            ));
        }
        if !(self.conditioning.fade_ms >= 0.0) {
            return invalid(format!("fade of {} ms must not be negative", self.conditioning.fade_ms));
        }
        if !(self.conditioning.peak_ceiling > 0.0 && self.conditioning.peak_ceiling <= 1.0) {
            return invalid(format!(
                "peak ceiling {} must be in (0, 1]",
                self.conditioning.peak_ceiling
            ));
        }
        if self.engine.capture_block_frames == 0 {
            return invalid("capture block must hold at least one frame".to_string());
        }
        if self.engine.preferred_sample_rate == Some(0) {
            return invalid("preferred sample rate must not be 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.mix.headroom, 0.5);
        assert_eq!(settings.hold.cents_threshold, 25.0);
        assert_eq!(settings.engine.capture_block_frames, 1024);
        assert!(settings.recordings_dir.ends_with("takes"));
    }

    #[test]
    fn test_ron_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.ron");

        let mut settings = Settings::default();
        settings.hold.cents_threshold = 30.0;
        settings.engine.preferred_buffer_frames = Some(256);
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_json_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "mix": { "headroom": 0.25 } }"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.mix.headroom, 0.25);
        assert_eq!(settings.hold, HoldSettings::default());
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let settings = Settings::from_ron_str("(hold: (cents_threshold: 40.0))").unwrap();
        assert_eq!(settings.hold.cents_threshold, 40.0);
        assert_eq!(settings.hold.gap_factor, 2.1);
        assert_eq!(settings.conditioning, TakeConditioning::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.mix.headroom = 1.5;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let mut settings = Settings::default();
        settings.hold.cents_threshold = -1.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.conditioning.peak_ceiling = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.engine.capture_block_frames = 0;
        assert!(settings.validate().is_err());

        assert!(Settings::from_json_str(r#"{ "conditioning": { "fade_ms": -2.0 } }"#).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("none.ron")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
