// THEORY:
// Tunable parameters for the novelty model and the video reducer. Both structs
// deserialize from JSON with every field optional (defaults fill the gaps) and
// unknown keys rejected, so a misspelled parameter fails loudly instead of
// silently falling back to a default.

use crate::core_modules::backend::Backend;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of the per-pixel novelty model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoveltyConfig {
    /// Minimum activation score (0..=255) for a pixel to be labelled at all.
    pub event_threshold: f32,
    /// Minimum raw intensity change for an active pixel to count as new motion.
    pub event_type_threshold: u8,
    /// Adaptation rate handed to the foreground estimator.
    pub learning_rate: f64,
    /// Increment applied to accumulation where foreground is detected.
    pub accumulate_rate: f32,
    /// Decrement applied to accumulation everywhere else.
    pub decay_rate: f32,
    /// How the elementwise steps are executed.
    pub backend: Backend,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            event_threshold: 175.0,
            event_type_threshold: 10,
            learning_rate: 0.1,
            accumulate_rate: 2.0,
            decay_rate: 0.15,
            backend: Backend::Sequential,
        }
    }
}

impl NoveltyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=255.0).contains(&self.event_threshold) {
            return Err(ConfigError::invalid(
                "event_threshold",
                format!("{} is outside 0..=255", self.event_threshold),
            ));
        }
        if !(0.0..=1.0).contains(&self.learning_rate) {
            return Err(ConfigError::invalid(
                "learning_rate",
                format!("{} is outside 0..=1", self.learning_rate),
            ));
        }
        for (field, rate) in [
            ("accumulate_rate", self.accumulate_rate),
            ("decay_rate", self.decay_rate),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::invalid(
                    field,
                    format!("{rate} must be a non-negative finite number"),
                ));
            }
        }
        Ok(())
    }
}

/// Parameters of the frame selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReducerConfig {
    /// Only every Nth frame is run through the novelty model.
    pub sampling_rate: u64,
    /// A sample is eventful when its new-motion pixel count exceeds this.
    pub sample_threshold: u64,
    /// Working width every frame is resized to before analysis.
    pub frame_width: u32,
    /// Working height every frame is resized to before analysis.
    pub frame_height: u32,
    /// Seconds of video between progress log lines.
    pub progress_seconds: u64,
    pub novelty: NoveltyConfig,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 5,
            sample_threshold: 500,
            frame_width: 800,
            frame_height: 608,
            progress_seconds: 5,
            novelty: NoveltyConfig::default(),
        }
    }
}

impl ReducerConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_rate == 0 {
            return Err(ConfigError::invalid("sampling_rate", "must be at least 1"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(ConfigError::invalid(
                "frame_width/frame_height",
                format!("{}x{} has no pixels", self.frame_width, self.frame_height),
            ));
        }
        self.novelty.validate()
    }
}
