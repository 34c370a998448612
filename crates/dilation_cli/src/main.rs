use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dilation_runner_core::{Device, Runner};
use dilation_runner_tract::TractRunner;
use dilation_seg::options::{DEFAULT_INPUT_SIZE, DEFAULT_MEAN};
use dilation_seg::pipeline::check_deploy_geometry;
use dilation_seg::{DeployNet, ModelKind, Options, RunRequest};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Model {
    Frontend,
    Context,
    Joint,
}

impl From<Model> for ModelKind {
    fn from(model: Model) -> Self {
        match model {
            Model::Frontend => ModelKind::Frontend,
            Model::Context => ModelKind::Context,
            Model::Joint => ModelKind::Joint,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Tiled inference for dilated segmentation networks")]
struct Args {
    /// Model to test; only the front end is supported
    #[arg(value_enum)]
    model: Option<Model>,

    /// Working dir holding the deploy net, results and feature dumps
    #[arg(long, alias = "work_dir", default_value = "training/")]
    work_dir: PathBuf,

    /// Subdirectory for the results, e.g. "val" writes to <work_dir>/results/val/
    #[arg(long, alias = "sub_dir", default_value = "")]
    sub_dir: String,

    /// Text file listing one image path per line
    #[arg(long, alias = "image_list")]
    image_list: PathBuf,

    /// Trained weights (ONNX export of the deploy network)
    #[arg(long)]
    weights: PathBuf,

    /// Dump the response maps of the feature layer, e.g. as context module input
    #[arg(long)]
    bin: bool,

    /// Layer whose response maps are dumped; defaults to the penultimate layer
    #[arg(long, alias = "feat_layer_name")]
    feat_layer_name: Option<String>,

    /// Mean pixel (BGR) of the dataset; the default is the PASCAL mean
    #[arg(long, num_args = 3, value_names = ["B", "G", "R"], default_values_t = DEFAULT_MEAN)]
    mean: Vec<f32>,

    /// Input tile size of the deploy network
    #[arg(long, alias = "input_size", default_value_t = DEFAULT_INPUT_SIZE)]
    input_size: usize,

    /// Number of categories in the data
    #[arg(long)]
    classes: usize,

    /// Upsample the final feature map inside the network
    #[arg(long)]
    up: bool,

    /// Resampling factor from network output to image pixels [default: 1 with --up, else 8]
    #[arg(long)]
    zoom: Option<usize>,

    /// GPU for testing; a negative index selects the CPU
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    gpu: i32,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_request(self) -> Result<RunRequest> {
        let mean: [f32; 3] = self
            .mean
            .as_slice()
            .try_into()
            .context("--mean takes exactly three values")?;
        Ok(RunRequest {
            model: self.model.map(ModelKind::from),
            work_dir: self.work_dir,
            sub_dir: self.sub_dir,
            image_list: self.image_list,
            weights: self.weights,
            dump_features: self.bin,
            feat_layer_name: self.feat_layer_name,
            mean,
            input_size: self.input_size,
            classes: self.classes,
            upsample: self.up,
            gpu: self.gpu,
            zoom: self.zoom,
        })
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .context("failed to initialize logger")
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose)?;
    let request = args.into_request()?;

    let deploy = DeployNet::frontend(request.input_size, request.classes, request.upsample);
    let options = Options::resolve(request, &deploy.feature_layer)?;
    debug!(options = %serde_json::to_string(&options)?, "Resolved options");
    options.prepare_dirs()?;

    info!("Writing {}", options.deploy_net.display());
    deploy.write(&options.deploy_net)?;
    check_deploy_geometry(&deploy, &options)?;

    match options.device {
        Device::Gpu(index) => info!("Using GPU {index}"),
        Device::Cpu => info!("Using CPU"),
    }
    let runner = TractRunner::from_config(&options.runner_config())
        .with_context(|| format!("failed to load {}", options.weights.display()))?;

    let summary = dilation_seg::run(&options, &runner)?;
    info!(
        results = %summary.result_manifest.display(),
        images = summary.results.len(),
        "Done"
    );
    if let Some(feats) = &summary.feature_manifest {
        debug!(
            "Feature manifest: {} ({} bytes)",
            feats.display(),
            fs::metadata(feats)?.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pascal_setup() {
        let args = Args::try_parse_from([
            "dilation-test",
            "frontend",
            "--image-list",
            "val.txt",
            "--weights",
            "w.onnx",
            "--classes",
            "21",
        ])
        .unwrap();
        let request = args.into_request().unwrap();
        assert_eq!(request.model, Some(ModelKind::Frontend));
        assert_eq!(request.work_dir, PathBuf::from("training/"));
        assert_eq!(request.mean, DEFAULT_MEAN);
        assert_eq!(request.input_size, 900);
        assert_eq!(request.gpu, 0);
        assert!(!request.upsample && !request.dump_features);
    }

    #[test]
    fn accepts_underscore_flags_and_negative_gpu() {
        let args = Args::try_parse_from([
            "dilation-test",
            "frontend",
            "--image_list",
            "val.txt",
            "--weights",
            "w.onnx",
            "--classes",
            "19",
            "--work_dir",
            "cityscapes",
            "--mean",
            "72.39",
            "82.91",
            "73.16",
            "--gpu",
            "-1",
            "--up",
            "--bin",
        ])
        .unwrap();
        let request = args.into_request().unwrap();
        assert_eq!(request.work_dir, PathBuf::from("cityscapes"));
        assert_eq!(request.mean, [72.39, 82.91, 73.16]);
        assert_eq!(request.gpu, -1);
        assert!(request.upsample && request.dump_features);
    }

    #[test]
    fn classes_are_required() {
        let parsed = Args::try_parse_from([
            "dilation-test",
            "--image-list",
            "val.txt",
            "--weights",
            "w.onnx",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_model_is_rejected_by_parser() {
        let parsed = Args::try_parse_from([
            "dilation-test",
            "resnet",
            "--image-list",
            "val.txt",
            "--weights",
            "w.onnx",
            "--classes",
            "2",
        ]);
        assert!(parsed.is_err());
    }
}
