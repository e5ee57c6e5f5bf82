// THEORY:
// Errors are split by who can do something about them. Configuration mistakes
// are caught before any frame is read. Per-frame problems (an unreadable frame,
// a collaborator that fails on one input) cost a single sample and are
// reported as recoverable. Anything that breaks the output, or shows the engine
// is being driven wrongly, aborts the video through `ReduceError`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for a whole-video reduction.
pub type ReduceResult<T> = Result<T, ReduceError>;

/// Rejected configuration, reported before any frame is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Also covers unknown keys, which serde rejects while parsing.
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures raised by the novelty model and its collaborators.
#[derive(Debug, Error)]
pub enum NoveltyError {
    #[error("novelty model used before `initialize`")]
    NotInitialized,

    #[error("frame shape {width}x{height} cannot hold a novelty state")]
    InvalidShape { width: u32, height: u32 },

    #[error("frame rate {0} is not a positive finite number")]
    InvalidFrameRate(f64),

    #[error("frame is {found:?} but the model was initialized for {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("foreground estimator failed: {0}")]
    Estimator(String),

    #[error("edge-aware smoother failed: {0}")]
    Smoother(String),
}

impl NoveltyError {
    /// Collaborator failures only cost the current sample; everything else is a usage error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Estimator(_) | Self::Smoother(_))
    }
}

/// A frame that could not be produced by a [`crate::video::VideoSource`].
#[derive(Debug, Error)]
pub enum FrameAccessError {
    #[error("frame {index} is outside a video of {frame_count} frames")]
    OutOfRange { index: u64, frame_count: u64 },

    #[error("frame {index} could not be decoded: {reason}")]
    Decode { index: u64, reason: String },
}

/// A frame that could not be written by a [`crate::video::VideoSink`].
#[derive(Debug, Error)]
#[error("video sink failed: {message}")]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors that abort a whole-video reduction.
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Novelty(#[from] NoveltyError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("cannot open video `{name}`: {reason}")]
    Open { name: String, reason: String },

    #[error("reducer worker pool is unavailable: {0}")]
    WorkerUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_failures_are_recoverable() {
        assert!(NoveltyError::Estimator("gmm".into()).is_recoverable());
        assert!(NoveltyError::Smoother("filter".into()).is_recoverable());
        assert!(!NoveltyError::NotInitialized.is_recoverable());
        assert!(
            !NoveltyError::DimensionMismatch {
                expected: (4, 4),
                found: (2, 2)
            }
            .is_recoverable()
        );
    }

    #[test]
    fn invalid_value_names_the_field() {
        let err = ConfigError::invalid("sampling_rate", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid value for `sampling_rate`: must be at least 1"
        );
    }
}
