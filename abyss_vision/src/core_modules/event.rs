// THEORY:
// The `event` module holds the two pure, per-pixel functions at the heart of the
// novelty model, plus the three-level label they produce.
//
// 1.  **Ease Curve**: accumulated evidence `t` in [0, 1] is mapped to an activation
//     with the cubic −2t³ + 3t². Its slope is zero at both ends, so pixels that are
//     barely or fully saturated move slowly, while mid-range pixels react fastest.
// 2.  **Classification**: a pixel whose activation clears the event threshold is a
//     motion pixel. Whether the motion is *new* or *old* is decided by the raw
//     intensity change between the two frames being compared.
//
// Both functions are scalar and stateless; the backends sweep them over grids.

use serde::{Deserialize, Serialize};

/// The categorical outcome for a single pixel.
///
/// The discriminants are the intensities written into the label image that is
/// handed to the edge-aware smoother.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventLabel {
    /// Activation is below the event threshold.
    #[default]
    NoEvent = 0,
    /// Active pixel whose intensity barely moved: repetitive or lingering motion.
    OldMotion = 175,
    /// Active pixel with a real intensity change: novel motion.
    NewMotion = 255,
}

impl EventLabel {
    pub fn intensity(self) -> u8 {
        self as u8
    }
}

/// The cubic ease curve applied to accumulation state.
#[inline]
pub fn ease(t: f32) -> f32 {
    -2.0 * t * t * t + 3.0 * t * t
}

/// Activation score in label range for an accumulation value.
#[inline]
pub fn activation(t: f32) -> f32 {
    ease(t) * 255.0
}

/// Labels one pixel from the two frame intensities and its activation score.
#[inline]
pub fn classify(
    previous: u8,
    current: u8,
    activation: f32,
    event_threshold: f32,
    event_type_threshold: u8,
) -> EventLabel {
    if activation < event_threshold {
        return EventLabel::NoEvent;
    }
    let change = (current as i16 - previous as i16).abs();
    if change > event_type_threshold as i16 {
        EventLabel::NewMotion
    } else {
        EventLabel::OldMotion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ease_is_anchored_and_monotone() {
        assert_eq!(ease(0.0), 0.0);
        assert_eq!(ease(1.0), 1.0);
        assert!((ease(0.5) - 0.5).abs() < 1e-6);

        let mut last = ease(0.0);
        for step in 1..=100 {
            let value = ease(step as f32 / 100.0);
            assert!(value >= last);
            last = value;
        }
    }

    #[test]
    fn ease_is_flat_at_the_ends() {
        let near_zero = ease(0.01) - ease(0.0);
        let mid = ease(0.51) - ease(0.5);
        let near_one = ease(1.0) - ease(0.99);
        assert!(near_zero < mid / 10.0);
        assert!(near_one < mid / 10.0);
    }

    #[test]
    fn below_threshold_is_never_an_event() {
        assert_eq!(classify(0, 255, 174.9, 175.0, 10), EventLabel::NoEvent);
    }

    #[test]
    fn large_change_is_new_motion() {
        assert_eq!(classify(100, 111, 175.0, 175.0, 10), EventLabel::NewMotion);
        assert_eq!(classify(111, 100, 255.0, 175.0, 10), EventLabel::NewMotion);
    }

    #[test]
    fn small_change_is_old_motion() {
        assert_eq!(classify(100, 110, 200.0, 175.0, 10), EventLabel::OldMotion);
        assert_eq!(classify(50, 50, 255.0, 175.0, 10), EventLabel::OldMotion);
    }

    #[test]
    fn difference_does_not_wrap_around() {
        assert_eq!(classify(0, 255, 255.0, 175.0, 10), EventLabel::NewMotion);
        assert_eq!(classify(200, 10, 255.0, 175.0, 10), EventLabel::NewMotion);
    }

    #[test]
    fn label_intensities_match_the_label_image_values() {
        assert_eq!(EventLabel::NoEvent.intensity(), 0);
        assert_eq!(EventLabel::OldMotion.intensity(), 175);
        assert_eq!(EventLabel::NewMotion.intensity(), 255);
        assert_eq!(EventLabel::default(), EventLabel::NoEvent);
    }
}
