//! Tiled inference over an image list.
//!
//! Each image is mean-subtracted, reflect-padded by the margin, cut into
//! tiles, pushed through the runner one tile at a time, stitched, resampled
//! (or cropped) to its original size and reduced to a label map.

use std::path::{Path, PathBuf};
use std::time::Instant;

use dilation_runner_core::{take_blob, Runner};
use ndarray::{Array2, Array3, ArrayD, ArrayView3, Axis, Ix3, Ix4, IxDyn};
use tracing::{debug, info, warn};

use crate::blob::write_blob;
use crate::error::{Error, Result};
use crate::image_io::{load_bgr_image, save_label_map};
use crate::interp::{crop, interp_map};
use crate::labels::argmax_classes;
use crate::manifest::{write_manifest, FEATURE_MANIFEST, RESULT_MANIFEST};
use crate::netspec::{DeployNet, PROB_BLOB};
use crate::options::Options;
use crate::padding::{pad_reflect, Border};
use crate::stitch::BlockGrid;
use crate::tiling::{TileGeometry, TileGrid};

/// Stitched network output for one image, before zoom or crop.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub grid: TileGrid,
    /// `classes × rows·block × cols·block` probabilities.
    pub prob: Array3<f32>,
    /// Stitched activations of the feature layer, when dumping.
    pub features: Option<Array3<f32>>,
}

/// Files written for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOutputs {
    pub label_map: PathBuf,
    pub features: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub results: Vec<PathBuf>,
    pub features: Vec<PathBuf>,
    pub result_manifest: PathBuf,
    pub feature_manifest: Option<PathBuf>,
}

pub struct Segmenter<'a, R: Runner> {
    runner: &'a R,
    options: &'a Options,
    geometry: TileGeometry,
    /// NCHW input reused for every forward pass.
    tile_input: ArrayD<f32>,
}

impl<'a, R: Runner> Segmenter<'a, R> {
    pub fn new(runner: &'a R, options: &'a Options) -> Result<Self> {
        let geometry = TileGeometry::new(options.input_size, options.margin, options.zoom)?;
        let info = runner.info();
        let expected = [1, 3, options.input_size, options.input_size];
        if info.input_shape != expected {
            return Err(Error::Shape(format!(
                "runner input {:?} does not match the expected batch-1 tile {expected:?}",
                info.input_shape
            )));
        }
        info!(
            backend = %info.backend,
            device = %info.device,
            "Input size: {:?}",
            info.input_shape
        );
        Ok(Self {
            runner,
            options,
            geometry,
            tile_input: ArrayD::zeros(IxDyn(&expected)),
        })
    }

    pub fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    /// Run every tile of a mean-subtracted `H×W×3` image through the runner.
    pub fn predict(&mut self, image: ArrayView3<'_, f32>) -> Result<Prediction> {
        let (height, width, channels) = image.dim();
        if channels != 3 {
            return Err(Error::Shape(format!("expected 3 channels, got {channels}")));
        }
        let padded = pad_reflect(image, Border::uniform(self.geometry.margin));
        let grid = self.geometry.grid(height, width);
        debug!(rows = grid.rows, cols = grid.cols, "Tiling image");

        let names = self.options.blob_names();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut probs = BlockGrid::new();
        let mut feats = self.options.dump_features.then(BlockGrid::new);

        for row in 0..grid.rows {
            for col in 0..grid.cols {
                {
                    let mut buffer = self.tile_input.view_mut().into_dimensionality::<Ix4>()?;
                    self.geometry.fill_tile(
                        padded.view(),
                        row,
                        col,
                        buffer.index_axis_mut(Axis(0), 0),
                    )?;
                }
                let mut blobs = self
                    .runner
                    .forward(&self.tile_input, &names)
                    .map_err(Error::inference)?;

                let prob = take_blob(&mut blobs, PROB_BLOB).map_err(Error::inference)?;
                probs.push(self.prob_block(prob)?);
                if let Some(feats) = feats.as_mut() {
                    let name = &self.options.feat_layer_name;
                    let feat = take_blob(&mut blobs, name).map_err(Error::inference)?;
                    feats.push(first_item(feat, name)?);
                }
            }
            probs.finish_row()?;
            if let Some(feats) = feats.as_mut() {
                feats.finish_row()?;
            }
        }

        Ok(Prediction {
            grid,
            prob: probs.finish()?,
            features: feats.map(BlockGrid::finish).transpose()?,
        })
    }

    /// Bring a prediction back to `height×width` and pick a class per pixel.
    pub fn label_map(
        &self,
        prediction: &Prediction,
        height: usize,
        width: usize,
    ) -> Result<Array2<u8>> {
        let zoom = self.geometry.zoom;
        let volume = if zoom > 1 {
            interp_map(prediction.prob.view(), zoom, width, height)?
        } else {
            crop(prediction.prob.view(), height, width)?
        };
        argmax_classes(volume.view())
    }

    /// Predict one image file and write its label map (and feature dump).
    pub fn process_image(&mut self, path: &Path) -> Result<ImageOutputs> {
        let stem = path
            .file_stem()
            .ok_or_else(|| Error::InvalidOption(format!("{} has no file name", path.display())))?
            .to_string_lossy()
            .into_owned();
        info!("Predicting {}", path.display());
        let started = Instant::now();

        let image = load_bgr_image(path, self.options.mean)?;
        let (height, width, _) = image.dim();
        info!("Image size: {height}x{width}");

        let prediction = self.predict(image.view())?;
        let labels = self.label_map(&prediction, height, width)?;

        let features = match &prediction.features {
            Some(feats) => {
                let out = self.options.feat_dir.join(format!("{stem}.bin"));
                info!("Writing {}", out.display());
                write_blob(&out, feats)?;
                Some(out)
            }
            None => None,
        };
        let label_map = self.options.result_dir.join(format!("{stem}.png"));
        info!("Writing {}", label_map.display());
        save_label_map(&labels, &label_map)?;

        debug!(
            tiles = prediction.grid.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image done"
        );
        Ok(ImageOutputs {
            label_map,
            features,
        })
    }

    fn prob_block(&self, prob: ArrayD<f32>) -> Result<Array3<f32>> {
        let block = self.geometry.block_size();
        let expected = [1, self.options.classes, block, block];
        if prob.shape() != expected {
            return Err(Error::Shape(format!(
                "'{PROB_BLOB}' blob is {:?}, expected {expected:?}",
                prob.shape()
            )));
        }
        first_item(prob, PROB_BLOB)
    }
}

/// Drop the batch axis of a `1×C×H×W` blob.
fn first_item(blob: ArrayD<f32>, name: &str) -> Result<Array3<f32>> {
    if blob.ndim() != 4 || blob.shape()[0] != 1 {
        return Err(Error::Shape(format!(
            "blob '{name}' must be 1xCxHxW, got {:?}",
            blob.shape()
        )));
    }
    Ok(blob.index_axis_move(Axis(0), 0).into_dimensionality::<Ix3>()?)
}

/// Warn when the deploy graph's output extent disagrees with the tiling.
///
/// Returns whether the extents agree. A deploy graph whose shapes cannot be
/// inferred is reported the same way and never aborts the run.
pub fn check_deploy_geometry(deploy: &DeployNet, options: &Options) -> Result<bool> {
    let geometry = TileGeometry::new(options.input_size, options.margin, options.zoom)?;
    let extent = match deploy.prob_extent() {
        Ok(extent) => extent,
        Err(err) => {
            warn!(error = %err, "Cannot infer the deploy network output size");
            return Ok(false);
        }
    };
    if extent != geometry.block_size() {
        warn!(
            deploy_extent = extent,
            block = geometry.block_size(),
            zoom = options.zoom,
            "Deploy network output does not match the tile block size"
        );
        return Ok(false);
    }
    Ok(true)
}

/// Process every image in the list, then write the manifests.
///
/// Manifests are only written once all images succeed; an error leaves the
/// per-image outputs written so far without a manifest.
pub fn run<R: Runner>(options: &Options, runner: &R) -> Result<RunSummary> {
    let images = options.read_image_list()?;
    let mut segmenter = Segmenter::new(runner, options)?;

    let mut results = Vec::with_capacity(images.len());
    let mut features = Vec::new();
    for path in &images {
        let outputs = segmenter.process_image(path)?;
        results.push(outputs.label_map);
        features.extend(outputs.features);
    }

    info!("All {} results are generated.", results.len());

    let result_manifest = options.result_dir.join(RESULT_MANIFEST);
    write_manifest(&result_manifest, &results)?;
    let feature_manifest = if options.dump_features {
        let path = options.feat_dir.join(FEATURE_MANIFEST);
        write_manifest(&path, &features)?;
        Some(path)
    } else {
        None
    };

    Ok(RunSummary {
        results,
        features,
        result_manifest,
        feature_manifest,
    })
}
