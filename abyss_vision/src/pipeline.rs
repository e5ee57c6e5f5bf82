// THEORY:
// The `pipeline` module is the top-level API of the engine for a single video.
// `VideoReducer` walks a `VideoSource`, asks the `NoveltyModel` how much new
// motion each sampled frame shows, and writes the interesting stretches to a
// `VideoSink`.
//
// Key architectural principles:
// 1.  **Sparse Sampling**: only every `sampling_rate`-th frame is analysed. The
//     model is a temporal filter, so it sees the sampled frames strictly in order
//     and nothing else.
// 2.  **Gapless Output**: when a sample is eventful, the raw frames the sampler
//     stepped over are back-filled before the sample itself, so retained footage
//     plays at normal speed instead of in jumps.
// 3.  **Append-Only Output**: the output sequence remembers the next index it has
//     not written yet. Back-fill never reaches below it, so two eventful samples
//     in a row can never duplicate or reorder frames.
// 4.  **Local Failures Stay Local**: an unreadable frame or a failing estimator
//     costs one sample, never the whole video. Only the sink and programming
//     errors abort a run.

use crate::config::ReducerConfig;
use crate::core_modules::foreground::{ForegroundEstimator, MixtureBackground};
use crate::core_modules::guided_filter::{EdgeAwareSmoother, GuidedFilter};
use crate::core_modules::novelty_model::NoveltyModel;
use crate::error::{ConfigError, ReduceResult};
use crate::video::{VideoSink, VideoSource, prepare_frame};
use image::{GrayImage, RgbImage};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Smoothed label value counted towards a sample's novelty.
pub const NEW_MOTION_INTENSITY: u8 = 255;

/// The novelty measured for one sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleScore {
    pub index: u64,
    pub novelty: u64,
    pub eventful: bool,
}

/// What a reduction run did, frame by frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReductionReport {
    pub frame_count: u64,
    /// Every sampled index in order, including skipped ones (scored 0).
    pub samples: Vec<SampleScore>,
    /// Sampled indices that could not be evaluated.
    pub skipped: Vec<u64>,
    /// Raw frame indices written to the sink, in write order.
    pub retained: Vec<u64>,
    /// True when a stop request ended the run before the last sample.
    pub stopped: bool,
}

impl ReductionReport {
    pub fn eventful_samples(&self) -> usize {
        self.samples.iter().filter(|sample| sample.eventful).count()
    }

    /// Fraction of the input that ended up in the output.
    pub fn retained_fraction(&self) -> f64 {
        if self.frame_count == 0 {
            0.0
        } else {
            self.retained.len() as f64 / self.frame_count as f64
        }
    }
}

/// Number of pixels carrying the new-motion label.
pub fn novelty_score(labels: &GrayImage) -> u64 {
    labels
        .as_raw()
        .iter()
        .filter(|&&value| value == NEW_MOTION_INTENSITY)
        .count() as u64
}

/// Bookkeeping for the frames already handed to the sink.
#[derive(Debug, Default)]
struct OutputSequence {
    next_unwritten: u64,
    retained: Vec<u64>,
}

impl OutputSequence {
    fn push<K: VideoSink + ?Sized>(&mut self, sink: &mut K, index: u64, frame: &RgbImage) -> ReduceResult<()> {
        sink.append(frame)?;
        self.retained.push(index);
        self.next_unwritten = index + 1;
        Ok(())
    }
}

/// Reduces one video at a time to its novel segments.
pub struct VideoReducer<F = MixtureBackground, S = GuidedFilter> {
    config: ReducerConfig,
    model: NoveltyModel<F, S>,
    stop: Option<Arc<AtomicBool>>,
}

impl VideoReducer {
    /// A reducer with the default estimator and smoother.
    pub fn new(config: ReducerConfig) -> Result<Self, ConfigError> {
        Self::with_components(config, MixtureBackground::new(), GuidedFilter::default())
    }
}

impl<F: ForegroundEstimator, S: EdgeAwareSmoother> VideoReducer<F, S> {
    pub fn with_components(config: ReducerConfig, estimator: F, smoother: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let model = NoveltyModel::with_components(config.novelty.clone(), estimator, smoother);
        Ok(Self {
            config,
            model,
            stop: None,
        })
    }

    /// Checks `flag` before every sampled frame and stops early once it is set.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn config(&self) -> &ReducerConfig {
        &self.config
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Runs one whole video from `source` into `sink` and finalises the sink.
    pub fn reduce<V, K>(&mut self, source: &mut V, sink: &mut K) -> ReduceResult<ReductionReport>
    where
        V: VideoSource + ?Sized,
        K: VideoSink + ?Sized,
    {
        let metadata = source.metadata();
        let (width, height) = (self.config.frame_width, self.config.frame_height);
        let sampling_rate = self.config.sampling_rate;
        let threshold = self.config.sample_threshold;

        self.model.initialize(width, height, metadata.frame_rate)?;
        let progress_every = (metadata.frame_rate.round() as u64)
            .max(1)
            .saturating_mul(self.config.progress_seconds);

        info!(
            frame_count = metadata.frame_count,
            frame_rate = metadata.frame_rate,
            sampling_rate,
            threshold,
            "reducing video"
        );

        let mut report = ReductionReport {
            frame_count: metadata.frame_count,
            ..ReductionReport::default()
        };
        let mut output = OutputSequence::default();
        let mut previous: Option<GrayImage> = None;

        let mut index = 0;
        while index < metadata.frame_count {
            if self.stop_requested() {
                info!(index, "stop requested, finalising partial output");
                report.stopped = true;
                break;
            }

            let sample = index;
            index += sampling_rate;

            let raw = match source.frame(sample) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(index = sample, error = %err, "cannot access sampled frame");
                    report.skip(sample);
                    continue;
                }
            };

            let current = prepare_frame(&raw, width, height);
            let labels = {
                let reference = previous.as_ref().unwrap_or(&current);
                match self.model.update(reference, &current) {
                    Ok(labels) => labels,
                    Err(err) if err.is_recoverable() => {
                        warn!(index = sample, error = %err, "novelty update failed");
                        report.skip(sample);
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            };
            previous = Some(current);

            let novelty = novelty_score(&labels);
            let eventful = novelty > threshold;
            debug!(index = sample, novelty, eventful, "sample scored");
            report.samples.push(SampleScore {
                index: sample,
                novelty,
                eventful,
            });

            if eventful {
                let start = sample.saturating_sub(sampling_rate).max(output.next_unwritten);
                for skipped in start..sample {
                    match source.frame(skipped) {
                        Ok(frame) => output.push(sink, skipped, &frame)?,
                        Err(err) => warn!(index = skipped, error = %err, "cannot back-fill frame"),
                    }
                }
                output.push(sink, sample, &raw)?;
            }

            if progress_every > 0 && sample % progress_every == 0 {
                info!(
                    seconds = sample as f64 / metadata.frame_rate,
                    retained = output.retained.len(),
                    "progress"
                );
            }
        }

        sink.finish()?;
        report.retained = output.retained;

        info!(
            retained = report.retained.len(),
            eventful = report.eventful_samples(),
            skipped = report.skipped.len(),
            stopped = report.stopped,
            "video reduced"
        );
        Ok(report)
    }
}

impl ReductionReport {
    fn skip(&mut self, index: u64) {
        self.skipped.push(index);
        self.samples.push(SampleScore {
            index,
            novelty: 0,
            eventful: false,
        });
    }
}
