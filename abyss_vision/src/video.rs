// THEORY:
// The reducer never talks to a codec directly. It sees a video as two narrow
// seams:
// 1.  **`VideoSource`**: random access to raw RGB frames by index, plus the two
//     numbers the reducer needs up front (frame rate and frame count). Random
//     access is required because back-filling re-reads frames the sampler
//     stepped over.
// 2.  **`VideoSink`**: an append-only consumer of raw frames that is finalised
//     exactly once.
// Codec-backed implementations live with the binary; the in-memory ones here
// let the whole engine run without any native video library.

use crate::error::{FrameAccessError, SinkError};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// What the reducer needs to know about a video before reading it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub frame_rate: f64,
    pub frame_count: u64,
}

/// Random-access reader of raw frames.
pub trait VideoSource {
    fn metadata(&self) -> VideoMetadata;

    /// Reads frame `index`. Failures are per-frame; the source stays usable.
    fn frame(&mut self, index: u64) -> Result<RgbImage, FrameAccessError>;
}

/// Append-only writer of raw frames.
pub trait VideoSink {
    fn append(&mut self, frame: &RgbImage) -> Result<(), SinkError>;

    /// Flushes and closes the output. No `append` may follow.
    fn finish(&mut self) -> Result<(), SinkError>;
}

/// Resizes a raw frame to the working size and converts it to grayscale.
pub fn prepare_frame(raw: &RgbImage, width: u32, height: u32) -> GrayImage {
    if raw.dimensions() == (width, height) {
        imageops::grayscale(raw)
    } else {
        let resized = imageops::resize(raw, width, height, FilterType::Triangle);
        imageops::grayscale(&resized)
    }
}

/// A video held entirely in memory. `None` entries model undecodable frames.
#[derive(Debug, Clone, Default)]
pub struct MemoryVideo {
    pub frames: Vec<Option<RgbImage>>,
    pub frame_rate: f64,
}

impl MemoryVideo {
    pub fn new(frames: Vec<RgbImage>, frame_rate: f64) -> Self {
        Self {
            frames: frames.into_iter().map(Some).collect(),
            frame_rate,
        }
    }

    /// Replaces frame `index` with a decode failure.
    pub fn corrupt(&mut self, index: usize) {
        if let Some(slot) = self.frames.get_mut(index) {
            *slot = None;
        }
    }
}

impl VideoSource for MemoryVideo {
    fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            frame_rate: self.frame_rate,
            frame_count: self.frames.len() as u64,
        }
    }

    fn frame(&mut self, index: u64) -> Result<RgbImage, FrameAccessError> {
        let frame_count = self.frames.len() as u64;
        match self.frames.get(index as usize) {
            Some(Some(frame)) => Ok(frame.clone()),
            Some(None) => Err(FrameAccessError::Decode {
                index,
                reason: "frame data is missing".into(),
            }),
            None => Err(FrameAccessError::OutOfRange { index, frame_count }),
        }
    }
}

/// Collects appended frames in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub frames: Vec<RgbImage>,
    pub finished: bool,
    capacity: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every append after the first `capacity` frames.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }
}

impl VideoSink for MemorySink {
    fn append(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        if self.finished {
            return Err(SinkError::new("append after finish"));
        }
        if self.capacity.is_some_and(|limit| self.frames.len() >= limit) {
            return Err(SinkError::new("sink is full"));
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.finished = true;
        Ok(())
    }
}

impl<T: VideoSource + ?Sized> VideoSource for Box<T> {
    fn metadata(&self) -> VideoMetadata {
        (**self).metadata()
    }

    fn frame(&mut self, index: u64) -> Result<RgbImage, FrameAccessError> {
        (**self).frame(index)
    }
}

impl<T: VideoSink + ?Sized> VideoSink for Box<T> {
    fn append(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        (**self).append(frame)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }
}
