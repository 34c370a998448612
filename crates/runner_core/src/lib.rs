//! # dilation_runner_core
//!
//! Shared trait and types for the segmentation inference runners.
//! Backend crates (`dilation_runner_tract`) implement the [`Runner`] trait
//! defined here, so the tiling pipeline never depends on a concrete engine.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Named output tensors returned by a forward pass.
pub type Blobs = HashMap<String, ArrayD<f32>>;

/// Metadata describing a loaded model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Human-readable name of the model.
    pub name: String,
    /// Backend used for inference (e.g. "tract").
    pub backend: String,
    /// Input blob shape, NCHW (e.g. `[1, 3, 900, 900]`).
    pub input_shape: Vec<usize>,
    /// Names of the blobs the runner can return.
    pub outputs: Vec<String>,
    /// Device the forward passes actually execute on.
    pub device: Device,
}

/// Execution device, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Gpu(u32),
}

impl Device {
    /// Map a CLI-style GPU index to a device; negative selects the CPU.
    pub fn from_index(gpu: i32) -> Self {
        if gpu < 0 {
            Device::Cpu
        } else {
            Device::Gpu(gpu as u32)
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}

/// Configuration for loading a runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Path to the serialized deploy graph description.
    pub graph_path: PathBuf,
    /// Path to the trained weights.
    pub weights_path: PathBuf,
    /// Expected input shape.
    pub input_shape: Vec<usize>,
    /// Blobs the runner must be able to return from [`Runner::forward`].
    pub outputs: Vec<String>,
    /// Requested execution device.
    pub device: Device,
    /// Whether to apply backend-specific optimizations.
    pub optimize: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            graph_path: PathBuf::new(),
            weights_path: PathBuf::new(),
            input_shape: vec![1, 3, 900, 900],
            outputs: vec!["prob".to_string()],
            device: Device::Cpu,
            optimize: true,
        }
    }
}

/// The core trait that all inference backends must implement.
///
/// # Example
/// ```ignore
/// let runner = TractRunner::from_config(&config)?;
/// let input = ndarray::ArrayD::<f32>::zeros(IxDyn(&[1, 3, 900, 900]));
/// let blobs = runner.forward(&input, &["prob"])?;
/// println!("prob shape: {:?}", blobs["prob"].shape());
/// ```
pub trait Runner {
    /// Build the graph and load its weights.
    fn from_config(config: &RunnerConfig) -> Result<Self>
    where
        Self: Sized;

    /// Run one forward pass and return the requested blobs by name.
    fn forward(&self, input: &ArrayD<f32>, outputs: &[&str]) -> Result<Blobs>;

    /// Return metadata about the loaded model.
    fn info(&self) -> ModelInfo;
}

/// Remove `name` from a blob map, failing with a readable error when absent.
pub fn take_blob(blobs: &mut Blobs, name: &str) -> Result<ArrayD<f32>> {
    blobs
        .remove(name)
        .ok_or_else(|| anyhow!("runner did not return blob '{name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_model_info_serialize() {
        let info = ModelInfo {
            name: "frontend_vgg".to_string(),
            backend: "mock".to_string(),
            input_shape: vec![1, 3, 900, 900],
            outputs: vec!["prob".to_string()],
            device: Device::Gpu(1),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("frontend_vgg"));
        assert!(json.contains("Gpu"));
    }

    #[test]
    fn test_runner_config_default() {
        let config = RunnerConfig::default();
        assert_eq!(config.input_shape, vec![1, 3, 900, 900]);
        assert_eq!(config.outputs, vec!["prob".to_string()]);
        assert_eq!(config.device, Device::Cpu);
        assert!(config.optimize);
    }

    #[test]
    fn test_device_from_index() {
        assert_eq!(Device::from_index(-1), Device::Cpu);
        assert_eq!(Device::from_index(0), Device::Gpu(0));
        assert_eq!(Device::from_index(3).to_string(), "gpu:3");
    }

    #[test]
    fn test_take_blob_missing() {
        let mut blobs = Blobs::new();
        blobs.insert("prob".to_string(), ArrayD::zeros(IxDyn(&[1, 2, 3, 3])));
        assert!(take_blob(&mut blobs, "fc7").is_err());
        assert_eq!(take_blob(&mut blobs, "prob").unwrap().shape(), &[1, 2, 3, 3]);
        assert!(blobs.is_empty());
    }
}
