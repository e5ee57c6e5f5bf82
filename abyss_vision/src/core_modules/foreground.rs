// THEORY:
// The foreground estimator answers one question per pixel and per frame: "does
// this value fit what this pixel usually looks like?" It is the raw, noisy input
// of the novelty model. Underwater footage is full of drifting particles and
// flicker, so the estimator is never trusted on its own; the model integrates its
// answers over time.
//
// `MixtureBackground` keeps, for every pixel, a small mixture of Gaussians over
// intensity. Each component carries a weight (how often it explained the pixel),
// a mean and a variance.
// 1.  **Matching**: a new value matches the first component (in priority order)
//     whose mean lies within 2.5 standard deviations. A match pulls that
//     component's weight, mean and variance toward the value at the learning rate.
// 2.  **Replacement**: a value nothing explains evicts the weakest component and
//     starts a fresh, low-weight, wide component at the value.
// 3.  **Background Set**: components are kept sorted by weight / σ. The leading
//     components whose weights add up to the background ratio are "background";
//     a value explained by anything after them is foreground.
// The learning rate supplied per frame is used as-is, except on the very first
// frame where the model adopts the frame wholesale (rate 1/min(n, history)).

use crate::error::NoveltyError;
use image::GrayImage;

/// Produces a binary foreground mask for each incoming frame.
pub trait ForegroundEstimator {
    /// Forgets everything and prepares for frames of the given shape.
    /// `history` is the length, in frames, of the adaptive background window.
    fn reset(&mut self, width: u32, height: u32, history: u32);

    /// Classifies `frame` and adapts the background with `learning_rate`.
    /// The mask holds 255 for foreground and 0 for background.
    fn apply(&mut self, frame: &GrayImage, learning_rate: f64) -> Result<GrayImage, NoveltyError>;
}

const MIXTURES: usize = 5;
const BACKGROUND_RATIO: f32 = 0.7;
const NOISE_SIGMA: f32 = 15.0;
const MATCH_SIGMAS: f32 = 2.5;
const INITIAL_WEIGHT: f32 = 0.05;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

#[derive(Debug, Clone, Copy, Default)]
struct Component {
    weight: f32,
    mean: f32,
    variance: f32,
    priority: f32,
}

/// Per-pixel adaptive Gaussian mixture background model.
#[derive(Debug, Clone)]
pub struct MixtureBackground {
    width: u32,
    height: u32,
    history: u32,
    frames_seen: u64,
    /// `MIXTURES` consecutive components per pixel, highest priority first.
    components: Vec<Component>,
}

impl Default for MixtureBackground {
    fn default() -> Self {
        Self::new()
    }
}

impl MixtureBackground {
    /// An empty model; it must be `reset` before the first `apply`.
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            history: 1,
            frames_seen: 0,
            components: Vec::new(),
        }
    }

    pub fn history(&self) -> u32 {
        self.history
    }

    fn effective_rate(&self, learning_rate: f64) -> f32 {
        if learning_rate >= 0.0 && self.frames_seen > 1 {
            learning_rate as f32
        } else {
            1.0 / self.frames_seen.min(self.history as u64).max(1) as f32
        }
    }

    /// Updates one pixel's mixture with `value` and reports whether it is foreground.
    fn observe(mixture: &mut [Component], value: f32, rate: f32) -> bool {
        let initial_variance = NOISE_SIGMA * NOISE_SIGMA * 4.0;
        let min_variance = NOISE_SIGMA * NOISE_SIGMA;
        let match_bound = MATCH_SIGMAS * MATCH_SIGMAS;

        let mut total_weight = 0.0f32;
        let mut hit = None;
        let mut k = 0;

        while k < MIXTURES {
            let component = mixture[k];
            if component.weight < f32::EPSILON {
                break;
            }
            let diff = value - component.mean;
            let d2 = diff * diff;
            if d2 < match_bound * component.variance {
                let weight = component.weight + rate * (1.0 - component.weight);
                let variance =
                    (component.variance + rate * (d2 - component.variance)).max(min_variance);
                mixture[k] = Component {
                    weight,
                    mean: component.mean + rate * diff,
                    variance,
                    priority: weight / variance.sqrt(),
                };
                total_weight += weight;

                // Bubble the strengthened component up to its priority slot.
                let mut slot = k;
                while slot > 0 && mixture[slot - 1].priority < mixture[slot].priority {
                    mixture.swap(slot - 1, slot);
                    slot -= 1;
                }
                hit = Some(slot);
                k += 1;
                break;
            }
            total_weight += component.weight;
            k += 1;
        }

        let hit = match hit {
            Some(slot) => {
                total_weight += mixture[k..].iter().map(|c| c.weight).sum::<f32>();
                slot
            }
            None => {
                let slot = k.min(MIXTURES - 1);
                if k == MIXTURES {
                    total_weight -= mixture[slot].weight;
                }
                mixture[slot] = Component {
                    weight: INITIAL_WEIGHT,
                    mean: value,
                    variance: initial_variance,
                    priority: INITIAL_WEIGHT / initial_variance.sqrt(),
                };
                total_weight += INITIAL_WEIGHT;
                slot
            }
        };

        let scale = 1.0 / total_weight;
        let mut cumulative = 0.0f32;
        let mut background_len = MIXTURES;
        for (i, component) in mixture.iter_mut().enumerate() {
            component.weight *= scale;
            component.priority *= scale;
            cumulative += component.weight;
            if cumulative > BACKGROUND_RATIO && background_len == MIXTURES {
                background_len = i + 1;
            }
        }

        hit >= background_len
    }
}

impl ForegroundEstimator for MixtureBackground {
    fn reset(&mut self, width: u32, height: u32, history: u32) {
        self.width = width;
        self.height = height;
        self.history = history.max(1);
        self.frames_seen = 0;
        self.components = vec![Component::default(); width as usize * height as usize * MIXTURES];
    }

    fn apply(&mut self, frame: &GrayImage, learning_rate: f64) -> Result<GrayImage, NoveltyError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(NoveltyError::Estimator(format!(
                "frame is {:?} but the background holds {:?}",
                frame.dimensions(),
                (self.width, self.height)
            )));
        }

        self.frames_seen += 1;
        let rate = self.effective_rate(learning_rate);

        let mask: Vec<u8> = self
            .components
            .chunks_exact_mut(MIXTURES)
            .zip(frame.as_raw())
            .map(|(mixture, &value)| {
                if Self::observe(mixture, value as f32, rate) {
                    FOREGROUND
                } else {
                    BACKGROUND
                }
            })
            .collect();

        GrayImage::from_raw(self.width, self.height, mask)
            .ok_or_else(|| NoveltyError::Estimator("mask buffer has the wrong length".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn uniform(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    fn foreground_count(mask: &GrayImage) -> usize {
        mask.as_raw().iter().filter(|&&v| v == FOREGROUND).count()
    }

    #[test]
    fn first_frame_is_all_background() {
        let mut model = MixtureBackground::new();
        model.reset(8, 8, 30);
        let mask = model.apply(&uniform(8, 8, 90), 0.1).unwrap();
        assert_eq!(foreground_count(&mask), 0);
    }

    #[test]
    fn static_scene_stays_background() {
        let mut model = MixtureBackground::new();
        model.reset(6, 6, 30);
        for _ in 0..20 {
            let mask = model.apply(&uniform(6, 6, 40), 0.1).unwrap();
            assert_eq!(foreground_count(&mask), 0);
        }
    }

    #[test]
    fn sudden_bright_patch_is_foreground() {
        let mut model = MixtureBackground::new();
        model.reset(10, 10, 30);
        for _ in 0..5 {
            model.apply(&uniform(10, 10, 60), 0.1).unwrap();
        }

        let mut frame = uniform(10, 10, 60);
        for y in 2..5 {
            for x in 2..5 {
                frame.put_pixel(x, y, Luma([200]));
            }
        }
        let mask = model.apply(&frame, 0.1).unwrap();
        assert_eq!(foreground_count(&mask), 9);
        assert_eq!(mask.get_pixel(3, 3).0[0], FOREGROUND);
        assert_eq!(mask.get_pixel(0, 0).0[0], BACKGROUND);
    }

    #[test]
    fn persistent_change_is_absorbed_into_background() {
        let mut model = MixtureBackground::new();
        model.reset(4, 4, 30);
        for _ in 0..5 {
            model.apply(&uniform(4, 4, 30), 0.1).unwrap();
        }

        let mut foreground_frames = 0;
        for _ in 0..60 {
            let mask = model.apply(&uniform(4, 4, 220), 0.1).unwrap();
            if foreground_count(&mask) > 0 {
                foreground_frames += 1;
            }
        }
        assert!(foreground_frames > 0);
        assert!(foreground_frames < 60);
    }

    #[test]
    fn mismatched_frame_is_an_estimator_error() {
        let mut model = MixtureBackground::new();
        model.reset(4, 4, 10);
        let err = model.apply(&uniform(5, 4, 0), 0.1).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn reset_clamps_history_to_one_frame() {
        let mut model = MixtureBackground::new();
        model.reset(2, 2, 0);
        assert_eq!(model.history(), 1);
    }
}
