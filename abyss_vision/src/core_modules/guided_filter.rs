// THEORY:
// The raw event labels are speckled: one flickering particle can light up a lone
// pixel. The guided filter cleans them up using the current frame as a guide.
// Inside every window it fits the labels as a linear function of the guide,
// q = a·I + b, and averages the fitted coefficients over all windows that cover a
// pixel. Where the guide is flat the fit degenerates to a plain local mean (noise
// is averaged away); where the guide has a real edge the labels follow it instead
// of bleeding across.
//
// Implementation notes:
// - All box means come from summed-area tables, so the cost is independent of
//   the radius. Windows are clipped at the image border and divided by the number
//   of pixels actually covered.
// - Intensities stay in 0..255 units; `epsilon` regularises `a` in those units.
// - A label image that is already uniform comes back unchanged: with no variation
//   in the labels every fitted `a` is zero and every `b` is the label itself.

use crate::error::NoveltyError;
use image::GrayImage;

/// Smooths a label image while respecting edges in a guidance image.
pub trait EdgeAwareSmoother {
    fn smooth(&self, guidance: &GrayImage, labels: &GrayImage) -> Result<GrayImage, NoveltyError>;
}

pub const DEFAULT_RADIUS: u32 = 5;
pub const DEFAULT_EPSILON: f64 = 0.1;

/// Gray-guided filter with a square window of side `2 * radius + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidedFilter {
    pub radius: u32,
    pub epsilon: f64,
}

impl Default for GuidedFilter {
    fn default() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl EdgeAwareSmoother for GuidedFilter {
    fn smooth(&self, guidance: &GrayImage, labels: &GrayImage) -> Result<GrayImage, NoveltyError> {
        if guidance.dimensions() != labels.dimensions() {
            return Err(NoveltyError::Smoother(format!(
                "guide is {:?} but labels are {:?}",
                guidance.dimensions(),
                labels.dimensions()
            )));
        }
        let (width, height) = labels.dimensions();
        let (w, h, r) = (width as usize, height as usize, self.radius as usize);

        let guide: Vec<f64> = guidance.as_raw().iter().map(|&v| v as f64).collect();
        let input: Vec<f64> = labels.as_raw().iter().map(|&v| v as f64).collect();
        let guide_sq: Vec<f64> = guide.iter().map(|v| v * v).collect();
        let guide_input: Vec<f64> = guide.iter().zip(&input).map(|(i, p)| i * p).collect();

        let mean_guide = box_mean(&guide, w, h, r);
        let mean_input = box_mean(&input, w, h, r);
        let corr_guide = box_mean(&guide_sq, w, h, r);
        let corr_guide_input = box_mean(&guide_input, w, h, r);

        let mut a = vec![0.0f64; w * h];
        let mut b = vec![0.0f64; w * h];
        for i in 0..w * h {
            let variance = corr_guide[i] - mean_guide[i] * mean_guide[i];
            let covariance = corr_guide_input[i] - mean_guide[i] * mean_input[i];
            a[i] = covariance / (variance + self.epsilon);
            b[i] = mean_input[i] - a[i] * mean_guide[i];
        }

        let mean_a = box_mean(&a, w, h, r);
        let mean_b = box_mean(&b, w, h, r);

        let output = (0..w * h)
            .map(|i| (mean_a[i] * guide[i] + mean_b[i]).round().clamp(0.0, 255.0) as u8)
            .collect();

        GrayImage::from_raw(width, height, output)
            .ok_or_else(|| NoveltyError::Smoother("output buffer has the wrong length".into()))
    }
}

/// Mean over the clipped `(2r+1)²` window around every cell.
fn box_mean(values: &[f64], width: usize, height: usize, radius: usize) -> Vec<f64> {
    // Summed-area table with a zero row and column in front.
    let stride = width + 1;
    let mut table = vec![0.0f64; stride * (height + 1)];
    for y in 0..height {
        let mut row_sum = 0.0;
        for x in 0..width {
            row_sum += values[y * width + x];
            table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row_sum;
        }
    }

    let mut means = Vec::with_capacity(width * height);
    for y in 0..height {
        let top = y.saturating_sub(radius);
        let bottom = (y + radius + 1).min(height);
        for x in 0..width {
            let left = x.saturating_sub(radius);
            let right = (x + radius + 1).min(width);
            let sum = table[bottom * stride + right] - table[top * stride + right]
                - table[bottom * stride + left]
                + table[top * stride + left];
            let count = ((bottom - top) * (right - left)) as f64;
            means.push(sum / count);
        }
    }
    means
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn textured(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 37 + y * 91) % 256) as u8]))
    }

    #[test]
    fn uniform_labels_are_unchanged() {
        let filter = GuidedFilter::default();
        let guide = textured(23, 17);
        for value in [0u8, 175, 255] {
            let labels = GrayImage::from_pixel(23, 17, Luma([value]));
            let smoothed = filter.smooth(&guide, &labels).unwrap();
            assert_eq!(smoothed, labels);
        }
    }

    #[test]
    fn isolated_speck_on_flat_guide_is_suppressed() {
        let filter = GuidedFilter::default();
        let guide = GrayImage::from_pixel(21, 21, Luma([80]));
        let mut labels = GrayImage::new(21, 21);
        labels.put_pixel(10, 10, Luma([255]));

        let smoothed = filter.smooth(&guide, &labels).unwrap();
        assert!(smoothed.get_pixel(10, 10).0[0] < 10);
    }

    #[test]
    fn labels_follow_guide_edges() {
        let filter = GuidedFilter::default();
        let guide = GrayImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([180])
            } else {
                Luma([60])
            }
        });
        let labels = GrayImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        });

        let smoothed = filter.smooth(&guide, &labels).unwrap();
        assert_eq!(smoothed.get_pixel(20, 20).0[0], 255);
        assert_eq!(smoothed.get_pixel(10, 10).0[0], 255);
        assert_eq!(smoothed.get_pixel(9, 9).0[0], 0);
        assert_eq!(smoothed.get_pixel(2, 35).0[0], 0);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let filter = GuidedFilter::default();
        let err = filter
            .smooth(&GrayImage::new(4, 4), &GrayImage::new(4, 5))
            .unwrap_err();
        assert!(matches!(err, NoveltyError::Smoother(_)));
    }

    #[test]
    fn box_mean_clips_windows_at_borders() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        let means = box_mean(&values, 2, 2, 1);
        assert!(means.iter().all(|&m| (m - 2.5).abs() < 1e-12));

        let row = vec![0.0, 0.0, 9.0];
        let means = box_mean(&row, 3, 1, 1);
        assert_eq!(means, vec![0.0, 3.0, 4.5]);
    }
}
