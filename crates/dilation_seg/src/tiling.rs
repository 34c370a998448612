//! Tile geometry.
//!
//! An image padded by `margin` on every side is cut into `input_size`
//! square windows at a stride of `input_size - 2 * margin`. Each window
//! produces a `block_size` square of network output, where
//! `block_size = stride / zoom`.

use ndarray::{ArrayView3, ArrayViewMut3};

use crate::error::{Error, Result};
use crate::padding::reflect_101;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    pub input_size: usize,
    pub margin: usize,
    pub zoom: usize,
}

/// Number of tiles along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub rows: usize,
    pub cols: usize,
}

impl TileGrid {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TileGeometry {
    pub fn new(input_size: usize, margin: usize, zoom: usize) -> Result<Self> {
        if input_size <= 2 * margin {
            return Err(Error::InvalidOption(format!(
                "input size {input_size} must exceed twice the margin {margin}"
            )));
        }
        let stride = input_size - 2 * margin;
        if zoom == 0 || stride % zoom != 0 {
            return Err(Error::InvalidOption(format!(
                "zoom {zoom} must divide the tile stride {stride}"
            )));
        }
        Ok(Self {
            input_size,
            margin,
            zoom,
        })
    }

    /// Tile stride and the share of the image each tile predicts, in input pixels.
    pub fn output_size(&self) -> usize {
        self.input_size - 2 * self.margin
    }

    /// Extent of the network output for one tile.
    pub fn block_size(&self) -> usize {
        self.output_size() / self.zoom
    }

    pub fn tile_count(&self, extent: usize) -> usize {
        extent.div_ceil(self.output_size())
    }

    pub fn grid(&self, height: usize, width: usize) -> TileGrid {
        TileGrid {
            rows: self.tile_count(height),
            cols: self.tile_count(width),
        }
    }

    /// Extent of the stitched output before zoom or crop.
    pub fn stitched_extent(&self, grid: TileGrid) -> (usize, usize) {
        (grid.rows * self.block_size(), grid.cols * self.block_size())
    }

    /// Top-left corner of a tile in the padded image.
    pub fn tile_origin(&self, row: usize, col: usize) -> (usize, usize) {
        (row * self.output_size(), col * self.output_size())
    }

    /// Copy the tile at (`row`, `col`) of a padded HWC image into `target`
    /// as CHW. A window that runs past the padded image is completed by
    /// reflecting the window itself along its trailing edge.
    pub fn fill_tile(
        &self,
        padded: ArrayView3<'_, f32>,
        row: usize,
        col: usize,
        mut target: ArrayViewMut3<'_, f32>,
    ) -> Result<()> {
        let (ph, pw, channels) = padded.dim();
        let size = self.input_size;
        if target.dim() != (channels, size, size) {
            return Err(Error::Shape(format!(
                "tile buffer is {:?}, expected ({channels}, {size}, {size})",
                target.dim()
            )));
        }
        let (oy, ox) = self.tile_origin(row, col);
        if oy >= ph || ox >= pw {
            return Err(Error::Shape(format!(
                "tile ({row}, {col}) starts outside the {ph}x{pw} padded image"
            )));
        }
        let window_h = size.min(ph - oy);
        let window_w = size.min(pw - ox);

        let rows: Vec<usize> = (0..size)
            .map(|y| oy + reflect_101(y as isize, window_h))
            .collect();
        let cols: Vec<usize> = (0..size)
            .map(|x| ox + reflect_101(x as isize, window_w))
            .collect();
        for c in 0..channels {
            for (y, &sy) in rows.iter().enumerate() {
                for (x, &sx) in cols.iter().enumerate() {
                    target[[c, y, x]] = padded[[sy, sx, c]];
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Axis};

    #[test]
    fn tile_count_is_ceiling_division() {
        let geometry = TileGeometry::new(900, 186, 8).unwrap();
        assert_eq!(geometry.output_size(), 528);
        assert_eq!(geometry.block_size(), 66);
        assert_eq!(geometry.tile_count(1), 1);
        assert_eq!(geometry.tile_count(528), 1);
        assert_eq!(geometry.tile_count(529), 2);
        assert_eq!(geometry.tile_count(1056), 2);
        assert_eq!(geometry.tile_count(1057), 3);

        let grid = geometry.grid(500, 1200);
        assert_eq!(grid, TileGrid { rows: 1, cols: 3 });
        assert_eq!(geometry.stitched_extent(grid), (66, 198));
    }

    #[test]
    fn grid_len_counts_tiles() {
        let grid = TileGrid { rows: 2, cols: 3 };
        assert_eq!(grid.len(), 6);
        assert!(!grid.is_empty());
        assert!(TileGrid { rows: 0, cols: 3 }.is_empty());
    }

    #[test]
    fn rejects_inconsistent_geometry() {
        assert!(TileGeometry::new(372, 186, 1).is_err());
        assert!(TileGeometry::new(900, 186, 0).is_err());
        assert!(TileGeometry::new(900, 186, 5).is_err());
        assert!(TileGeometry::new(900, 186, 1).is_ok());
    }

    #[test]
    fn interior_tile_is_copied_verbatim() {
        let geometry = TileGeometry::new(6, 1, 1).unwrap();
        let padded = Array3::from_shape_fn((14, 14, 2), |(y, x, c)| (c * 1000 + y * 100 + x) as f32);
        let mut tile = Array3::zeros((2, 6, 6));
        geometry
            .fill_tile(padded.view(), 1, 1, tile.view_mut())
            .unwrap();
        assert_eq!(tile[[0, 0, 0]], 404.0);
        assert_eq!(tile[[1, 5, 5]], 1909.0);
    }

    #[test]
    fn trailing_shortfall_reflects_the_window() {
        // 3 rows of image + 2 margin = 5 padded rows; second tile row starts
        // at 2 and only 3 rows remain in the window.
        let geometry = TileGeometry::new(4, 1, 1).unwrap();
        let padded = Array3::from_shape_fn((5, 4, 1), |(y, x, _)| (y * 10 + x) as f32);
        let mut tile = Array3::zeros((1, 4, 4));
        geometry
            .fill_tile(padded.view(), 1, 0, tile.view_mut())
            .unwrap();
        let first_col: Vec<f32> = tile.index_axis(Axis(2), 0).row(0).to_vec();
        assert_eq!(first_col, vec![20.0, 30.0, 40.0, 30.0]);
    }

    #[test]
    fn rejects_wrong_buffer_shape() {
        let geometry = TileGeometry::new(4, 1, 1).unwrap();
        let padded = Array3::<f32>::zeros((5, 5, 3));
        let mut tile = Array3::zeros((3, 5, 5));
        assert!(geometry
            .fill_tile(padded.view(), 0, 0, tile.view_mut())
            .is_err());
    }
}
