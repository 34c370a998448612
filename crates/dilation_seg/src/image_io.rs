//! Image decode/encode helpers.
//!
//! - `load_bgr_image`: decode to an `H×W×3` f32 array in BGR order, minus the mean pixel.
//! - `save_label_map`: write class indices as an 8-bit grayscale PNG.

use std::path::Path;

use image::GrayImage;
use ndarray::{Array2, Array3};

use crate::error::{Error, Result};

pub fn load_bgr_image(path: &Path, mean_bgr: [f32; 3]) -> Result<Array3<f32>> {
    let rgb = image::open(path)
        .map_err(|e| Error::image(path, e))?
        .into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Array3::from_shape_fn(
        (height as usize, width as usize, 3),
        |(y, x, c)| {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            f32::from(pixel[2 - c]) - mean_bgr[c]
        },
    ))
}

pub fn save_label_map(labels: &Array2<u8>, path: &Path) -> Result<()> {
    let (height, width) = labels.dim();
    let data: Vec<u8> = labels.iter().copied().collect();
    let image = GrayImage::from_raw(width as u32, height as u32, data).ok_or_else(|| {
        Error::Shape(format!("label buffer does not match {width}x{height}"))
    })?;
    image.save(path).map_err(|e| Error::image(path, e))
}
