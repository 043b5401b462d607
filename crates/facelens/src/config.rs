use crate::engine::{EngineOptions, DEFAULT_DISPLAY_MAX_WIDTH, DEFAULT_TICK};
use facelens_core::geometry::{LIVE_SHRINK_FACTOR, STILL_SHRINK_FACTOR};
use facelens_core::inference::{DEFAULT_INPUT_SIZE, DEFAULT_SCORE_THRESHOLD};
use facelens_core::matcher::DEFAULT_MATCH_THRESHOLD;
use facelens_core::reference::{ReferenceEntry, ReferenceOptions, DEFAULT_LABELS};
use facelens_core::{Capabilities, DetectorOptions, Size};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FACELENS_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Application configuration, loaded from TOML with `FACELENS_*` overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path for the live view.
    pub camera_device: String,
    /// Requested capture resolution; the driver default when unset.
    pub camera_resolution: Option<Size>,
    /// Directory holding one `<label>.<ext>` image per reference identity.
    pub reference_dir: PathBuf,
    pub reference_labels: Vec<String>,
    pub reference_extension: String,
    /// Reject reference images showing more than one face.
    pub strict_reference_faces: bool,
    /// Maximum descriptor distance accepted as a match.
    pub match_threshold: f32,
    pub detector_input_size: u32,
    pub score_threshold: f32,
    /// Box shrink for the live overlay.
    pub live_shrink: f32,
    /// Box shrink for the still image overlay.
    pub still_shrink: f32,
    /// Loop tick period in milliseconds.
    pub frame_interval_ms: u64,
    pub display_max_width: u32,
    /// Vision helper command line (program followed by arguments).
    pub helper_command: Vec<String>,
    /// Font for captions drawn into rendered images; boxes only when unset
    /// or unreadable.
    pub caption_font: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_resolution: None,
            reference_dir: PathBuf::from("labeled_images"),
            reference_labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
            reference_extension: "jpg".to_string(),
            strict_reference_faces: true,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            detector_input_size: DEFAULT_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            live_shrink: LIVE_SHRINK_FACTOR,
            still_shrink: STILL_SHRINK_FACTOR,
            frame_interval_ms: DEFAULT_TICK.as_millis() as u64,
            display_max_width: DEFAULT_DISPLAY_MAX_WIDTH,
            helper_command: vec!["facelens-vision-helper".to_string()],
            caption_font: Some(PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")),
        }
    }
}

impl Config {
    /// Load from `path`, else `$FACELENS_CONFIG`, else defaults; then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply `FACELENS_*` overrides from `lookup`. Unparsable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACELENS_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACELENS_REFERENCE_DIR") {
            self.reference_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACELENS_CAPTION_FONT") {
            self.caption_font = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        override_parsed(&lookup, "FACELENS_MATCH_THRESHOLD", &mut self.match_threshold);
        override_parsed(&lookup, "FACELENS_FRAME_INTERVAL_MS", &mut self.frame_interval_ms);
        override_parsed(&lookup, "FACELENS_DISPLAY_MAX_WIDTH", &mut self.display_max_width);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &str, v: f32| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be positive, got {v}")))
            }
        };
        positive("match_threshold", self.match_threshold)?;
        positive("score_threshold", self.score_threshold)?;

        for (name, v) in [("live_shrink", self.live_shrink), ("still_shrink", self.still_shrink)] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(ConfigError::Invalid(format!("{name} must be in (0, 1], got {v}")));
            }
        }
        if self.detector_input_size == 0 {
            return Err(ConfigError::Invalid("detector_input_size must be non-zero".into()));
        }
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("frame_interval_ms must be non-zero".into()));
        }
        if self.helper_command.is_empty() {
            return Err(ConfigError::Invalid("helper_command must name a program".into()));
        }
        Ok(())
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            input_size: self.detector_input_size,
            score_threshold: self.score_threshold,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            detector: self.detector_options(),
            capabilities: Capabilities::ALL,
            tick: Duration::from_millis(self.frame_interval_ms),
            display_max_width: self.display_max_width,
        }
    }

    pub fn reference_entries(&self) -> Vec<ReferenceEntry> {
        ReferenceEntry::from_labels(&self.reference_dir, &self.reference_labels, &self.reference_extension)
    }

    pub fn reference_options(&self) -> ReferenceOptions {
        ReferenceOptions {
            detector: self.detector_options(),
            strict: self.strict_reference_faces,
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
    }
}
