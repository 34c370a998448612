//! Reflection padding for HWC float images.
//!
//! Borders mirror the image without repeating the edge pixel
//! (`dcb|abcd|cba`), wrapping again when a border is wider than the image.

use ndarray::{Array3, ArrayView3};

/// Map `index` into `0..len` by reflecting about the first and last element.
pub fn reflect_101(index: isize, len: usize) -> usize {
    debug_assert!(len > 0, "cannot reflect into an empty axis");
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let folded = index.rem_euclid(period);
    if folded >= len as isize {
        (period - folded) as usize
    } else {
        folded as usize
    }
}

/// Source indices for an axis of `len` grown by `before` and `after`.
pub fn reflect_indices(len: usize, before: usize, after: usize) -> Vec<usize> {
    (0..before + len + after)
        .map(|i| reflect_101(i as isize - before as isize, len))
        .collect()
}

/// Border widths, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Border {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Border {
    pub fn uniform(width: usize) -> Self {
        Self {
            top: width,
            bottom: width,
            left: width,
            right: width,
        }
    }
}

/// Reflect-pad an `H×W×C` image.
pub fn pad_reflect(image: ArrayView3<'_, f32>, border: Border) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let rows = reflect_indices(h, border.top, border.bottom);
    let cols = reflect_indices(w, border.left, border.right);
    Array3::from_shape_fn((rows.len(), cols.len(), c), |(y, x, ch)| {
        image[[rows[y], cols[x], ch]]
    })
}
