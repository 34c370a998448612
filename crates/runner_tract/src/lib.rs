//! # dilation_runner_tract
//!
//! ONNX inference runner built on `tract-onnx`. Runs on the CPU only; a
//! requested GPU is reported and ignored.

use anyhow::{bail, Context, Result};
use dilation_runner_core::{Blobs, Device, ModelInfo, Runner, RunnerConfig};
use ndarray::{ArrayD, IxDyn};
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

/// A runner backed by tract with a fixed input fact.
pub struct TractRunner {
    model: TypedRunnableModel<TypedModel>,
    config: RunnerConfig,
}

impl Runner for TractRunner {
    fn from_config(config: &RunnerConfig) -> Result<Self> {
        if let Device::Gpu(index) = config.device {
            warn!(gpu = index, "tract executes on the CPU; ignoring GPU request");
        }
        if config.outputs.is_empty() {
            bail!("runner config must name at least one output blob");
        }
        info!(
            graph = %config.graph_path.display(),
            weights = %config.weights_path.display(),
            "Loading ONNX model"
        );

        let mut model = tract_onnx::onnx()
            .model_for_path(&config.weights_path)
            .with_context(|| format!("failed to read {}", config.weights_path.display()))?
            .with_input_fact(0, f32::fact(config.input_shape.iter().copied()).into())?;
        model
            .set_output_names(&config.outputs)
            .with_context(|| format!("model does not expose blobs {:?}", config.outputs))?;

        let typed = if config.optimize {
            model.into_optimized()?
        } else {
            model.into_typed()?.into_decluttered()?
        };
        let model = typed.into_runnable()?;
        debug!(outputs = ?config.outputs, "Model ready");

        Ok(Self {
            model,
            config: config.clone(),
        })
    }

    fn forward(&self, input: &ArrayD<f32>, outputs: &[&str]) -> Result<Blobs> {
        if input.shape() != self.config.input_shape.as_slice() {
            bail!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                self.config.input_shape
            );
        }
        let standard = input.as_standard_layout();
        let data = standard
            .as_slice()
            .context("input tensor is not contiguous")?;
        let tensor = Tensor::from_shape(input.shape(), data)?;
        let result = self.model.run(tvec!(tensor.into()))?;

        let mut blobs = Blobs::new();
        for &name in outputs {
            let index = self
                .config
                .outputs
                .iter()
                .position(|o| o == name)
                .with_context(|| format!("blob '{name}' was not configured as an output"))?;
            let view = result[index].to_array_view::<f32>()?;
            let array =
                ArrayD::from_shape_vec(IxDyn(view.shape()), view.iter().copied().collect())?;
            blobs.insert(name.to_string(), array);
        }
        Ok(blobs)
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.weights_path.display().to_string(),
            backend: "tract".to_string(),
            input_shape: self.config.input_shape.clone(),
            outputs: self.config.outputs.clone(),
            device: Device::Cpu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_weights_file_is_an_error() {
        let config = RunnerConfig {
            weights_path: "nonexistent.onnx".into(),
            ..RunnerConfig::default()
        };
        // Loading fails because the file doesn't exist.
        let result = TractRunner::from_config(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_output_list_is_rejected() {
        let config = RunnerConfig {
            weights_path: "nonexistent.onnx".into(),
            outputs: vec![],
            ..RunnerConfig::default()
        };
        let err = TractRunner::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("at least one output"));
    }
}
