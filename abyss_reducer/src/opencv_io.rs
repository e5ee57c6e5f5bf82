// THEORY:
// OpenCV-backed implementations of the reducer's video seams. The source reads
// sequentially and seeks only when the reducer jumps back for a back-fill. The
// sink takes its frame size from the first frame it is given, because container
// headers can disagree with what the decoder actually produces.

use abyss_vision::error::{FrameAccessError, SinkError};
use abyss_vision::video::{VideoMetadata, VideoSink, VideoSource};
use anyhow::{Context, bail};
use image::RgbImage;
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::path::Path;

/// Reads frames from a video file, seeking only when access is not sequential.
pub struct OpenCvSource {
    capture: VideoCapture,
    metadata: VideoMetadata,
    width: u32,
    height: u32,
    position: u64,
}

impl OpenCvSource {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let path_str = path
            .to_str()
            .with_context(|| format!("{} is not valid UTF-8", path.display()))?;
        let capture = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            bail!("cannot open video {}", path.display());
        }

        let metadata = VideoMetadata {
            frame_rate: capture.get(videoio::CAP_PROP_FPS)?,
            frame_count: capture.get(videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as u64,
        };
        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;

        Ok(Self {
            capture,
            metadata,
            width,
            height,
            position: 0,
        })
    }

    /// Native frame size of the file.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_at(&mut self, index: u64) -> opencv::Result<Option<RgbImage>> {
        if index != self.position {
            self.capture.set(videoio::CAP_PROP_POS_FRAMES, index as f64)?;
        }
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        self.position = index + 1;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let (cols, rows) = (rgb.cols() as u32, rgb.rows() as u32);
        Ok(RgbImage::from_raw(cols, rows, rgb.data_bytes()?.to_vec()))
    }
}

impl VideoSource for OpenCvSource {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn frame(&mut self, index: u64) -> Result<RgbImage, FrameAccessError> {
        if index >= self.metadata.frame_count {
            return Err(FrameAccessError::OutOfRange {
                index,
                frame_count: self.metadata.frame_count,
            });
        }
        match self.read_at(index) {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                // The decoder position is unknown after a failed read.
                self.position = u64::MAX;
                Err(FrameAccessError::Decode {
                    index,
                    reason: "decoder returned no frame".into(),
                })
            }
            Err(err) => {
                self.position = u64::MAX;
                Err(FrameAccessError::Decode {
                    index,
                    reason: err.to_string(),
                })
            }
        }
    }
}

/// Size of the output file: the first written frame wins, the header is the
/// fallback for an output that receives no frames.
fn output_size(first_frame: Option<(u32, u32)>, header: (u32, u32)) -> (u32, u32) {
    first_frame.unwrap_or(header)
}

/// Writes frames to an mp4v-encoded file at the source's frame rate.
///
/// The encoder is opened on the first `append`, sized from that frame.
pub struct OpenCvSink {
    path: String,
    frame_rate: f64,
    header_size: (u32, u32),
    writer: Option<(VideoWriter, (u32, u32))>,
}

impl OpenCvSink {
    pub fn create(path: &Path, frame_rate: f64, header_size: (u32, u32)) -> anyhow::Result<Self> {
        let path = path
            .to_str()
            .with_context(|| format!("{} is not valid UTF-8", path.display()))?
            .to_string();
        Ok(Self {
            path,
            frame_rate,
            header_size,
            writer: None,
        })
    }

    fn open_writer(&self, (width, height): (u32, u32)) -> anyhow::Result<VideoWriter> {
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let size = core::Size::new(width as i32, height as i32);
        let writer = VideoWriter::new(&self.path, fourcc, self.frame_rate, size, true)?;
        if !writer.is_opened()? {
            bail!("cannot create video {}", self.path);
        }
        Ok(writer)
    }

    fn write_rgb(writer: &mut VideoWriter, frame: &RgbImage) -> opencv::Result<()> {
        let (width, height) = frame.dimensions();
        let size = core::Size::new(width as i32, height as i32);
        let mut rgb = Mat::new_size_with_default(size, core::CV_8UC3, Scalar::all(0.0))?;
        rgb.data_bytes_mut()?.copy_from_slice(frame.as_raw());
        let mut bgr = Mat::default();
        imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
        writer.write(&bgr)
    }
}

impl VideoSink for OpenCvSink {
    fn append(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        if self.writer.is_none() {
            let size = output_size(Some(frame.dimensions()), self.header_size);
            let writer = self
                .open_writer(size)
                .map_err(|err| SinkError::new(format!("{err:#}")))?;
            self.writer = Some((writer, size));
        }
        let Some((writer, size)) = self.writer.as_mut() else {
            return Err(SinkError::new("output is not open"));
        };
        if frame.dimensions() != *size {
            return Err(SinkError::new(format!(
                "frame is {:?} but the output is {:?}",
                frame.dimensions(),
                size
            )));
        }
        Self::write_rgb(writer, frame).map_err(|err| SinkError::new(err.to_string()))
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let mut writer = match self.writer.take() {
            Some((writer, _)) => writer,
            // Nothing retained: still leave an empty output behind.
            None => self
                .open_writer(output_size(None, self.header_size))
                .map_err(|err| SinkError::new(format!("{err:#}")))?,
        };
        writer
            .release()
            .map_err(|err| SinkError::new(err.to_string()))
    }
}
