// THEORY:
// The `NoveltyModel` is the stateful heart of the engine. For one video it keeps
// a per-pixel memory of recent foreground activity and uses it to decide which
// changes are worth attention.
//
// Key architectural principles:
// 1.  **Bounded Memory**: the accumulation grid T gains `accumulate_rate` on every
//     frame the estimator flags a pixel and loses `decay_rate` otherwise, then is
//     clamped to [0, 1]. However long a pixel stays busy or quiet, its memory never
//     runs away, and it forgets at a fixed pace.
// 2.  **History Over Instants**: a pixel is only labelled when its *accumulated*
//     activation clears `event_threshold`. The instantaneous intensity change then
//     only splits active pixels into new versus old motion.
// 3.  **Fixed Update Order**: mask → delta → accumulate+clamp → activation → labels →
//     smoothing. Each step reads only what the previous steps wrote, and frames are
//     fed strictly in order by the caller; this is a sequential dynamical system.
// 4.  **Exclusive State**: all four grids live in one `NoveltyState` owned by the
//     model. They are replaced wholesale by `initialize`, never shared.
// 5.  **All-or-Nothing Updates**: every update is computed into a second, scratch
//     `NoveltyState` and swapped in only once smoothing succeeds. A failing
//     collaborator leaves the live state exactly as it was.

use crate::config::NoveltyConfig;
use crate::core_modules::event::{self, EventLabel};
use crate::core_modules::foreground::{BACKGROUND, ForegroundEstimator, MixtureBackground};
use crate::core_modules::grid::grid::Grid;
use crate::core_modules::guided_filter::{EdgeAwareSmoother, GuidedFilter};
use crate::error::NoveltyError;
use image::GrayImage;
use tracing::debug;

/// Accumulation value given to every pixel before its first update; clamps to 0.
pub const UNSEEN_ACCUMULATION: f32 = -6.0;

/// The per-pixel grids of one video's novelty model.
#[derive(Debug, Clone)]
pub struct NoveltyState {
    /// T: accumulated evidence of recent change, in [0, 1] after any update.
    pub accumulation: Grid<f32>,
    /// D: the signed increment applied to T by the latest update.
    pub delta: Grid<f32>,
    /// P: activation score in label range (0..=255).
    pub activation: Grid<f32>,
    /// E: unsmoothed event labels from the latest update.
    pub events: Grid<EventLabel>,
}

impl NoveltyState {
    fn new(width: u32, height: u32) -> Self {
        Self {
            accumulation: Grid::filled(width, height, UNSEEN_ACCUMULATION),
            delta: Grid::filled(width, height, 0.0),
            activation: Grid::filled(width, height, 0.0),
            events: Grid::filled(width, height, EventLabel::NoEvent),
        }
    }
}

/// Turns consecutive frame pairs into smoothed per-pixel event labels.
pub struct NoveltyModel<F = MixtureBackground, S = GuidedFilter> {
    config: NoveltyConfig,
    estimator: F,
    smoother: S,
    state: Option<NoveltyState>,
    scratch: Option<NoveltyState>,
    updates: u64,
}

impl NoveltyModel {
    /// A model using the mixture background and the guided filter.
    pub fn new(config: NoveltyConfig) -> Self {
        Self::with_components(config, MixtureBackground::new(), GuidedFilter::default())
    }
}

impl<F: ForegroundEstimator, S: EdgeAwareSmoother> NoveltyModel<F, S> {
    pub fn with_components(config: NoveltyConfig, estimator: F, smoother: S) -> Self {
        Self {
            config,
            estimator,
            smoother,
            state: None,
            scratch: None,
            updates: 0,
        }
    }

    /// Allocates fresh state for frames of `width` x `height` and resets the
    /// estimator's background window to about one second of video.
    pub fn initialize(&mut self, width: u32, height: u32, frame_rate: f64) -> Result<(), NoveltyError> {
        if width == 0 || height == 0 {
            return Err(NoveltyError::InvalidShape { width, height });
        }
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(NoveltyError::InvalidFrameRate(frame_rate));
        }

        let history = (frame_rate.round() as u32).max(1);
        self.estimator.reset(width, height, history);
        self.state = Some(NoveltyState::new(width, height));
        self.scratch = Some(NoveltyState::new(width, height));
        self.updates = 0;
        debug!(width, height, history, "novelty model initialized");
        Ok(())
    }

    /// Advances the model by one frame pair and returns the smoothed label image.
    ///
    /// On error the live state is left untouched.
    pub fn update(&mut self, previous: &GrayImage, current: &GrayImage) -> Result<GrayImage, NoveltyError> {
        let (Some(state), Some(next)) = (self.state.as_mut(), self.scratch.as_mut()) else {
            return Err(NoveltyError::NotInitialized);
        };
        let expected = state.accumulation.dimensions();
        for frame in [previous, current] {
            if frame.dimensions() != expected {
                return Err(NoveltyError::DimensionMismatch {
                    expected,
                    found: frame.dimensions(),
                });
            }
        }

        let config = &self.config;
        let backend = config.backend;

        // 1. Foreground mask → signed delta.
        let mask = self.estimator.apply(current, config.learning_rate)?;
        let mask = mask.as_raw();
        let (accumulate, decay) = (config.accumulate_rate, config.decay_rate);
        backend.fill(&mut next.delta.data, |i| {
            if mask[i] == BACKGROUND {
                -decay
            } else {
                mask[i] as f32 / 255.0 * accumulate
            }
        });

        // 2. Accumulate and clamp.
        let (live, delta) = (&state.accumulation.data, &next.delta.data);
        backend.fill(&mut next.accumulation.data, |i| (live[i] + delta[i]).clamp(0.0, 1.0));

        // 3. Activation.
        let accumulation = &next.accumulation.data;
        backend.fill(&mut next.activation.data, |i| event::activation(accumulation[i]));

        // 4. Labels.
        let (prev_px, curr_px) = (previous.as_raw(), current.as_raw());
        let activation = &next.activation.data;
        let (event_threshold, event_type_threshold) =
            (config.event_threshold, config.event_type_threshold);
        backend.fill(&mut next.events.data, |i| {
            event::classify(
                prev_px[i],
                curr_px[i],
                activation[i],
                event_threshold,
                event_type_threshold,
            )
        });

        // 5. Edge-aware smoothing, guided by the current frame.
        let labels = next.events.to_gray_image(|label| label.intensity());
        let smoothed = self.smoother.smooth(current, &labels)?;

        std::mem::swap(state, next);
        self.updates += 1;
        Ok(smoothed)
    }

    /// The live state, or `None` before `initialize`.
    pub fn state(&self) -> Option<&NoveltyState> {
        self.state.as_ref()
    }

    pub fn config(&self) -> &NoveltyConfig {
        &self.config
    }

    /// Number of updates applied since the last `initialize`.
    pub fn updates(&self) -> u64 {
        self.updates
    }
}
