//! Run configuration.
//!
//! A [`RunRequest`] carries the raw values from the command line.
//! [`Options::resolve`] validates it, derives the output locations and
//! returns the frozen [`Options`] every later stage borrows.

use std::fs;
use std::path::{Path, PathBuf};

use dilation_runner_core::{Device, RunnerConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::netspec::PROB_BLOB;

/// Reflection border added around every image, in input pixels.
pub const LABEL_MARGIN: usize = 186;

/// Output stride of the frontend network when it does not upsample.
pub const FRONTEND_ZOOM: usize = 8;

/// PASCAL VOC mean pixel, BGR.
pub const DEFAULT_MEAN: [f32; 3] = [102.93, 111.36, 116.52];

pub const DEFAULT_INPUT_SIZE: usize = 900;

/// Label maps are 8-bit, so class indices must fit in a byte.
pub const MAX_CLASSES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    Frontend,
    Context,
    Joint,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Frontend => "frontend",
            ModelKind::Context => "context",
            ModelKind::Joint => "joint",
        }
    }
}

/// Unvalidated run parameters as supplied by the caller.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub model: Option<ModelKind>,
    pub work_dir: PathBuf,
    pub sub_dir: String,
    pub image_list: PathBuf,
    pub weights: PathBuf,
    pub dump_features: bool,
    pub feat_layer_name: Option<String>,
    pub mean: [f32; 3],
    pub input_size: usize,
    pub classes: usize,
    pub upsample: bool,
    pub gpu: i32,
    /// Overrides the zoom factor implied by `upsample`.
    pub zoom: Option<usize>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            model: Some(ModelKind::Frontend),
            work_dir: PathBuf::from("training"),
            sub_dir: String::new(),
            image_list: PathBuf::new(),
            weights: PathBuf::new(),
            dump_features: false,
            feat_layer_name: None,
            mean: DEFAULT_MEAN,
            input_size: DEFAULT_INPUT_SIZE,
            classes: 0,
            upsample: false,
            gpu: 0,
            zoom: None,
        }
    }
}

/// Immutable run configuration with every derived path resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Resolved model name, e.g. `frontend_vgg`.
    pub model_name: String,
    pub image_list: PathBuf,
    pub weights: PathBuf,
    pub work_dir: PathBuf,
    pub deploy_net: PathBuf,
    pub result_dir: PathBuf,
    /// Per-layer feature directory; only created when dumping.
    pub feat_dir: PathBuf,
    pub feat_layer_name: String,
    pub dump_features: bool,
    pub mean: [f32; 3],
    pub input_size: usize,
    pub classes: usize,
    pub upsample: bool,
    pub margin: usize,
    pub zoom: usize,
    pub device: Device,
}

impl Options {
    /// Validate `request` and derive the output layout.
    ///
    /// `default_feat_layer` is used when the request names no feature layer;
    /// the deploy builder reports it.
    pub fn resolve(request: RunRequest, default_feat_layer: &str) -> Result<Self> {
        if !request.image_list.exists() {
            return Err(Error::MissingInput {
                what: "image list",
                path: request.image_list,
            });
        }
        if !request.weights.exists() {
            return Err(Error::MissingInput {
                what: "weights",
                path: request.weights,
            });
        }
        let model = match request.model {
            Some(ModelKind::Frontend) => ModelKind::Frontend,
            Some(other) => return Err(Error::UnsupportedModel(other.as_str().to_string())),
            None => return Err(Error::UnsupportedModel("<none>".to_string())),
        };

        if request.classes == 0 || request.classes > MAX_CLASSES {
            return Err(Error::InvalidOption(format!(
                "classes must be in 1..={MAX_CLASSES}, got {}",
                request.classes
            )));
        }
        let margin = LABEL_MARGIN;
        if request.input_size <= 2 * margin {
            return Err(Error::InvalidOption(format!(
                "input size {} leaves no output area inside the {margin}px margin",
                request.input_size
            )));
        }
        let zoom = request
            .zoom
            .unwrap_or(if request.upsample { 1 } else { FRONTEND_ZOOM });
        let output_size = request.input_size - 2 * margin;
        if zoom == 0 || output_size % zoom != 0 {
            return Err(Error::InvalidOption(format!(
                "zoom {zoom} must be positive and divide the output size {output_size}"
            )));
        }

        let feat_layer_name = request
            .feat_layer_name
            .unwrap_or_else(|| default_feat_layer.to_string());
        if feat_layer_name == PROB_BLOB {
            return Err(Error::InvalidOption(format!(
                "feature layer cannot be the '{PROB_BLOB}' output"
            )));
        }

        let model_name = format!("{}_vgg", model.as_str());
        let work_dir = request.work_dir;
        let deploy_net = work_dir.join(format!("{model_name}_deploy.txt"));
        let result_dir = work_dir
            .join("results")
            .join(&request.sub_dir)
            .join(&model_name);
        let feat_dir = work_dir
            .join("bin")
            .join(&request.sub_dir)
            .join(&model_name)
            .join(&feat_layer_name);

        Ok(Self {
            model_name,
            image_list: request.image_list,
            weights: request.weights,
            work_dir,
            deploy_net,
            result_dir,
            feat_dir,
            feat_layer_name,
            dump_features: request.dump_features,
            mean: request.mean,
            input_size: request.input_size,
            classes: request.classes,
            upsample: request.upsample,
            margin,
            zoom,
            device: Device::from_index(request.gpu),
        })
    }

    /// Create the working, result and (when dumping) feature directories.
    /// Safe to call on an existing layout.
    pub fn prepare_dirs(&self) -> Result<()> {
        create_dir(&self.work_dir, "working directory")?;
        create_dir(&self.result_dir, "result directory")?;
        if self.dump_features {
            create_dir(&self.feat_dir, "feature directory")?;
        }
        Ok(())
    }

    /// Tile stride in input pixels.
    pub fn output_size(&self) -> usize {
        self.input_size - 2 * self.margin
    }

    /// Blobs each forward pass must return.
    pub fn blob_names(&self) -> Vec<String> {
        let mut names = vec![PROB_BLOB.to_string()];
        if self.dump_features {
            names.push(self.feat_layer_name.clone());
        }
        names
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            graph_path: self.deploy_net.clone(),
            weights_path: self.weights.clone(),
            input_shape: vec![1, 3, self.input_size, self.input_size],
            outputs: self.blob_names(),
            device: self.device,
            optimize: true,
        }
    }

    /// Image paths listed one per line; blank lines are skipped.
    pub fn read_image_list(&self) -> Result<Vec<PathBuf>> {
        let text =
            fs::read_to_string(&self.image_list).map_err(|e| Error::io(&self.image_list, e))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

fn create_dir(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        info!("Creating {what} {}", path.display());
    }
    fs::create_dir_all(path).map_err(|e| Error::io(path, e))
}
