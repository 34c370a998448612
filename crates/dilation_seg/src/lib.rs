//! # dilation_seg
//!
//! Sliding-window inference for dilated-convolution segmentation networks.
//!
//! Large images are reflect-padded, cut into fixed-size tiles that match the
//! network's input, run one tile at a time through a [`Runner`], stitched
//! back together and reduced to per-pixel class labels. Optional feature
//! dumps use the little-endian blob format in [`blob`].
//!
//! ```ignore
//! let deploy = DeployNet::frontend(request.input_size, request.classes, request.upsample);
//! let options = Options::resolve(request, &deploy.feature_layer)?;
//! options.prepare_dirs()?;
//! deploy.write(&options.deploy_net)?;
//! let runner = TractRunner::from_config(&options.runner_config())?;
//! let summary = pipeline::run(&options, &runner)?;
//! ```
//!
//! [`Runner`]: dilation_runner_core::Runner

pub mod blob;
pub mod error;
pub mod image_io;
pub mod interp;
pub mod labels;
pub mod manifest;
pub mod netspec;
pub mod options;
pub mod padding;
pub mod pipeline;
pub mod stitch;
pub mod tiling;

pub use error::{Error, Result};
pub use netspec::DeployNet;
pub use options::{ModelKind, Options, RunRequest};
pub use pipeline::{run, RunSummary, Segmenter};
pub use tiling::{TileGeometry, TileGrid};
