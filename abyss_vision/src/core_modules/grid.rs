// THEORY:
// The `Grid` module is the storage unit of the novelty engine. Every piece of
// per-pixel state the model keeps between frames (accumulation, delta,
// activation, event labels) has exactly the shape of the working frame, so a
// single row-major container serves all of them.
//
// Key architectural principles:
// 1.  **Data Container**: Like a frame buffer, a `Grid` is "dumb". It knows its
//     dimensions and how to index itself; it does not know what its values mean.
// 2.  **Fixed Shape**: The shape is chosen once, when the model is initialized for
//     a video, and never changes afterwards. Mismatched frames are rejected by the
//     model before they ever reach a grid.
// 3.  **Flat Storage**: Data lives in one contiguous `Vec`, which is what lets the
//     elementwise backends split the work into slices without copying.

pub mod grid {
    use image::GrayImage;

    /// A rectangular, row-major block of per-pixel values.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Grid<T> {
        /// The width of the grid in pixels.
        pub width: u32,
        /// The height of the grid in pixels.
        pub height: u32,
        /// A flattened vector holding `width * height` values.
        pub data: Vec<T>,
    }

    impl<T: Clone> Grid<T> {
        /// Creates a grid with every cell set to `value`.
        pub fn filled(width: u32, height: u32, value: T) -> Self {
            Self {
                width,
                height,
                data: vec![value; width as usize * height as usize],
            }
        }
    }

    impl<T> Grid<T> {
        pub fn len(&self) -> usize {
            self.data.len()
        }

        pub fn is_empty(&self) -> bool {
            self.data.is_empty()
        }

        pub fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        /// The value at column `x`, row `y`.
        pub fn get(&self, x: u32, y: u32) -> &T {
            &self.data[self.index(x, y)]
        }

        #[inline]
        pub fn index(&self, x: u32, y: u32) -> usize {
            y as usize * self.width as usize + x as usize
        }

        /// Renders the grid as an 8-bit image, one byte per cell.
        pub fn to_gray_image(&self, to_byte: impl Fn(&T) -> u8) -> GrayImage {
            let bytes = self.data.iter().map(to_byte).collect();
            // The buffer length is width * height by construction.
            GrayImage::from_raw(self.width, self.height, bytes)
                .unwrap_or_else(|| GrayImage::new(self.width, self.height))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::grid::Grid;

    #[test]
    fn filled_grid_has_one_cell_per_pixel() {
        let grid = Grid::filled(8, 3, 0.5f32);
        assert_eq!(grid.len(), 24);
        assert_eq!(grid.dimensions(), (8, 3));
        assert!(grid.data.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn indexing_is_row_major() {
        let mut grid = Grid::filled(4, 2, 0u8);
        let idx = grid.index(3, 1);
        grid.data[idx] = 9;
        assert_eq!(idx, 7);
        assert_eq!(*grid.get(3, 1), 9);
    }

    #[test]
    fn renders_to_gray_image() {
        let mut grid = Grid::filled(2, 2, false);
        grid.data[1] = true;
        let image = grid.to_gray_image(|&hot| if hot { 255 } else { 0 });
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(1, 0).0[0], 255);
        assert_eq!(image.get_pixel(0, 0).0[0], 0);
    }
}
