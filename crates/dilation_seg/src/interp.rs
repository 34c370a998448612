//! Resampling of stitched `C×H×W` volumes back to image resolution.

use ndarray::{s, Array3, ArrayView3};

use crate::error::{Error, Result};

/// Bilinearly upsample `prob` by an integer `zoom` to `height×width`.
///
/// Output pixel `(h, w)` reads the source cell `(h / zoom, w / zoom)` and
/// its lower/right neighbours, weighted by the fractional offsets.
/// Neighbours beyond the last row or column clamp to it.
pub fn interp_map(
    prob: ArrayView3<'_, f32>,
    zoom: usize,
    width: usize,
    height: usize,
) -> Result<Array3<f32>> {
    let (channels, rows, cols) = prob.dim();
    if zoom == 0 {
        return Err(Error::InvalidOption("zoom must be positive".to_string()));
    }
    if height == 0 || width == 0 {
        return Ok(Array3::zeros((channels, height, width)));
    }
    if (height - 1) / zoom >= rows || (width - 1) / zoom >= cols {
        return Err(Error::Shape(format!(
            "{rows}x{cols} map is too small to zoom x{zoom} to {height}x{width}"
        )));
    }

    let zoom_f = zoom as f32;
    let taps = |extent: usize, limit: usize| -> Vec<(usize, usize, f32)> {
        (0..extent)
            .map(|i| {
                let lo = i / zoom;
                let hi = (lo + 1).min(limit - 1);
                let t = i as f32 / zoom_f - lo as f32;
                (lo, hi, t)
            })
            .collect()
    };
    let row_taps = taps(height, rows);
    let col_taps = taps(width, cols);

    let mut out = Array3::<f32>::zeros((channels, height, width));
    for c in 0..channels {
        let plane = prob.index_axis(ndarray::Axis(0), c);
        for (h, &(r0, r1, rt)) in row_taps.iter().enumerate() {
            for (w, &(c0, c1, ct)) in col_taps.iter().enumerate() {
                let v0 = rt * plane[[r1, c0]] + (1.0 - rt) * plane[[r0, c0]];
                let v1 = rt * plane[[r1, c1]] + (1.0 - rt) * plane[[r0, c1]];
                out[[c, h, w]] = (1.0 - ct) * v0 + ct * v1;
            }
        }
    }
    Ok(out)
}

/// Keep the top-left `height×width` of a volume.
pub fn crop(prob: ArrayView3<'_, f32>, height: usize, width: usize) -> Result<Array3<f32>> {
    let (_, rows, cols) = prob.dim();
    if height > rows || width > cols {
        return Err(Error::Shape(format!(
            "cannot crop {height}x{width} from a {rows}x{cols} map"
        )));
    }
    Ok(prob.slice(s![.., ..height, ..width]).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn zoom_reaches_exact_target_size() {
        for (height, width) in [(1usize, 1usize), (37, 53), (64, 64), (65, 120)] {
            let rows = height.div_ceil(8) + 1;
            let cols = width.div_ceil(8) + 1;
            let prob = Array3::<f32>::ones((3, rows, cols));
            let out = interp_map(prob.view(), 8, width, height).unwrap();
            assert_eq!(out.dim(), (3, height, width));
        }
    }

    #[test]
    fn interpolates_linearly_between_cells() {
        let prob = Array3::from_shape_vec((1, 2, 2), vec![0.0, 8.0, 16.0, 24.0]).unwrap();
        let out = interp_map(prob.view(), 4, 4, 4).unwrap();
        assert_eq!(out[[0, 0, 0]], 0.0);
        assert_eq!(out[[0, 0, 2]], 4.0);
        assert_eq!(out[[0, 2, 0]], 8.0);
        assert_eq!(out[[0, 1, 1]], 6.0);
    }

    #[test]
    fn last_cell_clamps_instead_of_overrunning() {
        // Exactly rows * zoom pixels: the last row has no lower neighbour.
        let prob = Array3::from_shape_vec((1, 2, 1), vec![1.0, 3.0]).unwrap();
        let out = interp_map(prob.view(), 2, 1, 4).unwrap();
        let column: Vec<f32> = out.iter().copied().collect();
        assert_eq!(column, vec![1.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn too_small_source_is_rejected() {
        let prob = Array3::<f32>::zeros((1, 2, 2));
        assert!(interp_map(prob.view(), 8, 8, 17).is_err());
    }

    #[test]
    fn crop_keeps_top_left() {
        let prob = Array3::from_shape_fn((2, 5, 6), |(c, y, x)| (c * 100 + y * 10 + x) as f32);
        let out = crop(prob.view(), 3, 4).unwrap();
        assert_eq!(out.dim(), (2, 3, 4));
        assert_eq!(out[[1, 2, 3]], 123.0);
        assert!(crop(prob.view(), 6, 4).is_err());
    }
}
