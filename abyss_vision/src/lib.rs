// THEORY:
// This file is the main entry point for the `abyss_vision` library crate.
// It exposes the public API consumed by the `abyss_reducer` binary and by any
// other embedder that wants to shrink long underwater recordings down to the
// stretches where something new happens.
//
// The primary goal is to export `VideoReducer` (one video) and
// `ParallelReducer` (many videos) together with their configuration, report and
// I/O traits. The per-pixel novelty machinery lives in `core_modules` and is
// public for callers that want to drive the model frame by frame.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod video;

pub use config::{NoveltyConfig, ReducerConfig};
pub use core_modules::backend::Backend;
pub use core_modules::event::EventLabel;
pub use core_modules::novelty_model::NoveltyModel;
pub use error::{ConfigError, FrameAccessError, NoveltyError, ReduceError, SinkError};
pub use parallel_pipeline::{JobOutcome, ParallelReducer, VideoJob};
pub use pipeline::{ReductionReport, SampleScore, VideoReducer};
pub use video::{MemorySink, MemoryVideo, VideoMetadata, VideoSink, VideoSource};
