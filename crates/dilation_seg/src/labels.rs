//! Per-pixel class selection.

use ndarray::{Array2, ArrayView3, Axis};

use crate::error::{Error, Result};

/// Arg-max over the class axis of a `C×H×W` volume. Ties resolve to the
/// lowest class index.
pub fn argmax_classes(prob: ArrayView3<'_, f32>) -> Result<Array2<u8>> {
    let (classes, height, width) = prob.dim();
    if classes == 0 || classes > usize::from(u8::MAX) + 1 {
        return Err(Error::Shape(format!(
            "{classes} classes cannot be stored in an 8-bit label map"
        )));
    }
    let mut labels = Array2::<u8>::zeros((height, width));
    let mut best = prob.index_axis(Axis(0), 0).to_owned();
    for c in 1..classes {
        let plane = prob.index_axis(Axis(0), c);
        ndarray::Zip::from(&mut labels)
            .and(&mut best)
            .and(&plane)
            .for_each(|label, best, &value| {
                if value > *best {
                    *best = value;
                    *label = c as u8;
                }
            });
    }
    Ok(labels)
}
