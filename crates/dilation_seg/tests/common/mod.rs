#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, ensure};
use dilation_runner_core::{Blobs, Device, ModelInfo, Runner, RunnerConfig};
use dilation_seg::options::LABEL_MARGIN;
use dilation_seg::{Options, RunRequest};
use image::{Rgb, RgbImage};
use ndarray::{ArrayD, IxDyn};
use tempfile::TempDir;

pub const CLASSES: usize = 4;
/// Tile whose output area is 16 pixels wide.
pub const SMALL_TILE: usize = 2 * LABEL_MARGIN + 16;
/// Tile whose output area is 32 pixels wide, giving 4-pixel blocks at zoom 8.
pub const ZOOM_TILE: usize = 2 * LABEL_MARGIN + 32;

/// Deterministic stand-in for a segmentation network.
///
/// For output cell `(y, x)` it samples the tile at
/// `(margin + y * zoom, margin + x * zoom)`; channel 0 (blue) divided by ten
/// is the winning class. The feature blob echoes channels 1 and 2.
pub struct MockRunner {
    pub input_size: usize,
    pub zoom: usize,
    pub classes: usize,
    pub feature_layer: String,
    pub calls: AtomicUsize,
    pub fail_at: Option<usize>,
    /// Image `(row, col)` under each tile's first output cell, per forward pass.
    pub origins: Mutex<Vec<(usize, usize)>>,
}

impl MockRunner {
    pub fn new(input_size: usize, zoom: usize) -> Self {
        Self {
            input_size,
            zoom,
            classes: CLASSES,
            feature_layer: "final".to_string(),
            calls: AtomicUsize::new(0),
            fail_at: None,
            origins: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn origins(&self) -> Vec<(usize, usize)> {
        self.origins.lock().map(|o| o.clone()).unwrap_or_default()
    }

    fn block(&self) -> usize {
        (self.input_size - 2 * LABEL_MARGIN) / self.zoom
    }

    fn sample(&self, input: &ArrayD<f32>, channel: usize, y: usize, x: usize) -> f32 {
        input[[0, channel, LABEL_MARGIN + y * self.zoom, LABEL_MARGIN + x * self.zoom]]
    }
}

impl Runner for MockRunner {
    fn from_config(config: &RunnerConfig) -> anyhow::Result<Self> {
        let size = *config
            .input_shape
            .last()
            .ok_or_else(|| anyhow!("empty input shape"))?;
        Ok(Self::new(size, 1))
    }

    fn forward(&self, input: &ArrayD<f32>, outputs: &[&str]) -> anyhow::Result<Blobs> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(call) {
            bail!("mock failure on forward pass {call}");
        }
        ensure!(
            input.shape() == [1, 3, self.input_size, self.input_size],
            "unexpected input shape {:?}",
            input.shape()
        );

        if let Ok(mut origins) = self.origins.lock() {
            let row = self.sample(input, 2, 0, 0) as usize;
            let col = self.sample(input, 1, 0, 0) as usize;
            origins.push((row, col));
        }

        let block = self.block();
        let mut blobs = Blobs::new();
        for &name in outputs {
            let blob = if name == "prob" {
                let background = 0.1 / (self.classes - 1) as f32;
                let mut prob = ArrayD::from_elem(IxDyn(&[1, self.classes, block, block]), background);
                for y in 0..block {
                    for x in 0..block {
                        let label = (self.sample(input, 0, y, x) / 10.0).round();
                        let label = label.clamp(0.0, (self.classes - 1) as f32) as usize;
                        prob[[0, label, y, x]] = 0.9;
                    }
                }
                prob
            } else if name == self.feature_layer {
                let mut feat = ArrayD::zeros(IxDyn(&[1, 2, block, block]));
                for y in 0..block {
                    for x in 0..block {
                        feat[[0, 0, y, x]] = self.sample(input, 1, y, x);
                        feat[[0, 1, y, x]] = self.sample(input, 2, y, x);
                    }
                }
                feat
            } else {
                bail!("mock runner has no blob '{name}'");
            };
            blobs.insert(name.to_string(), blob);
        }
        Ok(blobs)
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: "mock".to_string(),
            backend: "mock".to_string(),
            input_shape: vec![1, 3, self.input_size, self.input_size],
            outputs: vec!["prob".to_string(), self.feature_layer.clone()],
            device: Device::Cpu,
        }
    }
}

/// Class encoded into the blue channel of the synthetic images.
pub fn striped_label(x: usize, y: usize) -> u8 {
    ((x / 7 + y / 5) % CLASSES) as u8
}

/// Blue = label × 10, green = column, red = row (saturating).
pub fn write_label_image(
    path: &Path,
    width: usize,
    height: usize,
    label_at: impl Fn(usize, usize) -> u8,
) {
    let mut img = RgbImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let pixel = Rgb([y.min(255) as u8, x.min(255) as u8, label_at(x, y) * 10]);
            img.put_pixel(x as u32, y as u32, pixel);
        }
    }
    img.save(path).unwrap();
}

pub struct Fixture {
    pub dir: TempDir,
    pub images: Vec<PathBuf>,
}

impl Fixture {
    /// Write striped images of the given `(width, height)` plus an image list.
    pub fn new(sizes: &[(usize, usize)]) -> Self {
        let dir = TempDir::new().unwrap();
        let mut images = Vec::new();
        for (i, &(width, height)) in sizes.iter().enumerate() {
            let path = dir.path().join(format!("img_{i}.png"));
            write_label_image(&path, width, height, striped_label);
            images.push(path);
        }
        let fixture = Self { dir, images };
        fixture.write_list(&fixture.images);
        fs::write(fixture.dir.path().join("weights.onnx"), b"stub").unwrap();
        fixture
    }

    pub fn write_list(&self, images: &[PathBuf]) {
        let list = images
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(self.dir.path().join("images.txt"), list).unwrap();
    }

    pub fn request(&self, input_size: usize, upsample: bool, dump_features: bool) -> RunRequest {
        RunRequest {
            work_dir: self.dir.path().join("work"),
            image_list: self.dir.path().join("images.txt"),
            weights: self.dir.path().join("weights.onnx"),
            dump_features,
            mean: [0.0; 3],
            input_size,
            classes: CLASSES,
            upsample,
            gpu: -1,
            ..RunRequest::default()
        }
    }

    pub fn options(&self, input_size: usize, upsample: bool, dump_features: bool) -> Options {
        let options =
            Options::resolve(self.request(input_size, upsample, dump_features), "final").unwrap();
        options.prepare_dirs().unwrap();
        options
    }
}
