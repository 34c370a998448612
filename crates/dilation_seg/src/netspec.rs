//! Deploy network description.
//!
//! Builds the dilated VGG-16 frontend as a list of Caffe-style layers,
//! serializes it to prototxt and infers the spatial extent of every blob
//! for a square input.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Input blob of the deploy network.
pub const DATA_BLOB: &str = "data";
/// Softmax output holding per-class probabilities.
pub const PROB_BLOB: &str = "prob";

#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    pub num_output: usize,
    pub kernel: usize,
    pub stride: usize,
    pub pad: usize,
    pub dilation: usize,
    pub group: usize,
    pub bias: bool,
    /// Weights are fixed (learning rate multiplier 0).
    pub frozen: bool,
    pub weight_filler: Option<&'static str>,
}

impl ConvParams {
    pub fn new(num_output: usize, kernel: usize) -> Self {
        Self {
            num_output,
            kernel,
            stride: 1,
            pad: 0,
            dilation: 1,
            group: 1,
            bias: true,
            frozen: false,
            weight_filler: None,
        }
    }

    pub fn dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self
    }

    fn effective_kernel(&self) -> usize {
        self.dilation * (self.kernel - 1) + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Input { shape: Vec<usize> },
    Convolution(ConvParams),
    Deconvolution(ConvParams),
    ReLU,
    MaxPool { kernel: usize, stride: usize },
    Dropout { ratio: f32 },
    Softmax,
}

impl LayerKind {
    fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Input { .. } => "Input",
            LayerKind::Convolution(_) => "Convolution",
            LayerKind::Deconvolution(_) => "Deconvolution",
            LayerKind::ReLU => "ReLU",
            LayerKind::MaxPool { .. } => "Pooling",
            LayerKind::Dropout { .. } => "Dropout",
            LayerKind::Softmax => "Softmax",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub bottom: Option<String>,
    pub top: String,
}

/// Channel count and square spatial extent of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobShape {
    pub channels: usize,
    pub extent: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetSpec {
    layers: Vec<Layer>,
}

impl NetSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer producing a new blob named after the layer.
    pub fn add(&mut self, name: &str, kind: LayerKind, bottom: &str) -> String {
        self.layers.push(Layer {
            name: name.to_string(),
            kind,
            bottom: Some(bottom.to_string()),
            top: name.to_string(),
        });
        name.to_string()
    }

    /// Append a layer that rewrites `blob` in place.
    pub fn add_in_place(&mut self, name: &str, kind: LayerKind, blob: &str) {
        self.layers.push(Layer {
            name: name.to_string(),
            kind,
            bottom: Some(blob.to_string()),
            top: blob.to_string(),
        });
    }

    pub fn add_input(&mut self, name: &str, shape: Vec<usize>) -> String {
        self.layers.push(Layer {
            name: name.to_string(),
            kind: LayerKind::Input { shape },
            bottom: None,
            top: name.to_string(),
        });
        name.to_string()
    }

    /// Propagate shapes from the input layer through every layer.
    pub fn blob_shapes(&self) -> Result<HashMap<String, BlobShape>> {
        let mut shapes: HashMap<String, BlobShape> = HashMap::new();
        for layer in &self.layers {
            let input = match (&layer.kind, &layer.bottom) {
                (LayerKind::Input { shape }, _) => {
                    let [_, channels, h, w] = shape.as_slice() else {
                        return Err(Error::Shape(format!(
                            "input layer '{}' must be NCHW, got {shape:?}",
                            layer.name
                        )));
                    };
                    if h != w {
                        return Err(Error::Shape(format!("input must be square, got {h}x{w}")));
                    }
                    shapes.insert(
                        layer.top.clone(),
                        BlobShape {
                            channels: *channels,
                            extent: *h,
                        },
                    );
                    continue;
                }
                (_, Some(bottom)) => *shapes.get(bottom).ok_or_else(|| {
                    Error::Shape(format!("layer '{}' reads unknown blob '{bottom}'", layer.name))
                })?,
                (_, None) => {
                    return Err(Error::Shape(format!("layer '{}' has no bottom", layer.name)))
                }
            };
            let output = layer_output(layer, input)?;
            shapes.insert(layer.top.clone(), output);
        }
        Ok(shapes)
    }

    pub fn blob_shape(&self, blob: &str) -> Result<BlobShape> {
        self.blob_shapes()?
            .remove(blob)
            .ok_or_else(|| Error::Shape(format!("network has no blob '{blob}'")))
    }

    /// Serialize as Caffe prototxt.
    pub fn to_prototxt(&self) -> String {
        let mut out = Prototxt::default();
        for layer in &self.layers {
            out.open("layer");
            out.string("name", &layer.name);
            out.string("type", layer.kind.type_name());
            if let Some(bottom) = &layer.bottom {
                out.string("bottom", bottom);
            }
            out.string("top", &layer.top);
            match &layer.kind {
                LayerKind::Input { shape } => {
                    out.open("input_param");
                    out.open("shape");
                    for dim in shape {
                        out.value("dim", dim);
                    }
                    out.close();
                    out.close();
                }
                LayerKind::Convolution(conv) => write_conv(&mut out, "convolution_param", conv),
                LayerKind::Deconvolution(conv) => {
                    write_conv(&mut out, "convolution_param", conv)
                }
                LayerKind::MaxPool { kernel, stride } => {
                    out.open("pooling_param");
                    out.value("pool", "MAX");
                    out.value("kernel_size", kernel);
                    out.value("stride", stride);
                    out.close();
                }
                LayerKind::Dropout { ratio } => {
                    out.open("dropout_param");
                    out.value("dropout_ratio", ratio);
                    out.close();
                }
                LayerKind::ReLU | LayerKind::Softmax => {}
            }
            out.close();
        }
        out.text
    }
}

fn layer_output(layer: &Layer, input: BlobShape) -> Result<BlobShape> {
    let shape = match &layer.kind {
        LayerKind::Convolution(conv) => {
            let span = input.extent + 2 * conv.pad;
            if span < conv.effective_kernel() {
                return Err(Error::Shape(format!(
                    "layer '{}' needs at least {} pixels, got {span}",
                    layer.name,
                    conv.effective_kernel()
                )));
            }
            BlobShape {
                channels: conv.num_output,
                extent: (span - conv.effective_kernel()) / conv.stride + 1,
            }
        }
        LayerKind::Deconvolution(conv) => {
            let full = conv.stride * (input.extent - 1) + conv.effective_kernel();
            BlobShape {
                channels: conv.num_output,
                extent: full.saturating_sub(2 * conv.pad),
            }
        }
        LayerKind::MaxPool { kernel, stride } => {
            if input.extent < *kernel {
                return Err(Error::Shape(format!(
                    "layer '{}' pools {kernel} pixels from {}",
                    layer.name, input.extent
                )));
            }
            // Caffe rounds pooled extents up.
            BlobShape {
                channels: input.channels,
                extent: (input.extent - kernel).div_ceil(*stride) + 1,
            }
        }
        LayerKind::ReLU | LayerKind::Dropout { .. } | LayerKind::Softmax => input,
        LayerKind::Input { .. } => unreachable!("input layers are handled by the caller"),
    };
    Ok(shape)
}

fn write_conv(out: &mut Prototxt, block: &str, conv: &ConvParams) {
    if conv.frozen {
        out.open("param");
        out.value("lr_mult", 0);
        out.value("decay_mult", 0);
        out.close();
    }
    out.open(block);
    out.value("num_output", conv.num_output);
    if !conv.bias {
        out.value("bias_term", "false");
    }
    if conv.pad > 0 {
        out.value("pad", conv.pad);
    }
    out.value("kernel_size", conv.kernel);
    if conv.group > 1 {
        out.value("group", conv.group);
    }
    if conv.stride > 1 {
        out.value("stride", conv.stride);
    }
    if let Some(filler) = conv.weight_filler {
        out.open("weight_filler");
        out.string("type", filler);
        out.close();
    }
    if conv.dilation > 1 {
        out.value("dilation", conv.dilation);
    }
    out.close();
}

#[derive(Default)]
struct Prototxt {
    text: String,
    depth: usize,
}

impl Prototxt {
    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.text.push_str("  ");
        }
    }

    fn open(&mut self, block: &str) {
        self.indent();
        let _ = writeln!(self.text, "{block} {{");
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth -= 1;
        self.indent();
        self.text.push_str("}\n");
    }

    fn value(&mut self, key: &str, value: impl std::fmt::Display) {
        self.indent();
        let _ = writeln!(self.text, "{key}: {value}");
    }

    fn string(&mut self, key: &str, value: &str) {
        self.indent();
        let _ = writeln!(self.text, "{key}: \"{value}\"");
    }
}

/// Deploy graph plus the name of its last feature layer before softmax.
#[derive(Debug, Clone)]
pub struct DeployNet {
    pub spec: NetSpec,
    pub feature_layer: String,
}

impl DeployNet {
    /// Dilated VGG-16 frontend for `input_size`² inputs and `classes`
    /// outputs, optionally followed by a fixed ×8 bilinear upsample.
    pub fn frontend(input_size: usize, classes: usize, upsample: bool) -> Self {
        let mut net = NetSpec::new();
        let data = net.add_input(DATA_BLOB, vec![1, 3, input_size, input_size]);
        let (mut last, feature_layer) = build_frontend_vgg(&mut net, &data, classes);
        if upsample {
            last = add_upsample(&mut net, &last, classes);
        }
        net.add(PROB_BLOB, LayerKind::Softmax, &last);
        Self {
            spec: net,
            feature_layer,
        }
    }

    /// Spatial extent of the probability map for one input tile.
    pub fn prob_extent(&self) -> Result<usize> {
        Ok(self.spec.blob_shape(PROB_BLOB)?.extent)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.spec.to_prototxt()).map_err(|e| Error::io(path, e))
    }
}

fn build_frontend_vgg(net: &mut NetSpec, bottom: &str, classes: usize) -> (String, String) {
    // (stage, channels, convs, dilation, pooled)
    const STAGES: [(usize, usize, usize, usize, bool); 5] = [
        (1, 64, 2, 1, true),
        (2, 128, 2, 1, true),
        (3, 256, 3, 1, true),
        (4, 512, 3, 1, false),
        (5, 512, 3, 2, false),
    ];

    let mut prev = bottom.to_string();
    for (stage, channels, convs, dilation, pooled) in STAGES {
        for i in 1..=convs {
            let conv = ConvParams::new(channels, 3).dilation(dilation);
            prev = net.add(
                &format!("conv{stage}_{i}"),
                LayerKind::Convolution(conv),
                &prev,
            );
            net.add_in_place(&format!("relu{stage}_{i}"), LayerKind::ReLU, &prev);
        }
        if pooled {
            prev = net.add(
                &format!("pool{stage}"),
                LayerKind::MaxPool {
                    kernel: 2,
                    stride: 2,
                },
                &prev,
            );
        }
    }

    let fc6 = net.add(
        "fc6",
        LayerKind::Convolution(ConvParams::new(4096, 7).dilation(4)),
        &prev,
    );
    net.add_in_place("relu6", LayerKind::ReLU, &fc6);
    net.add_in_place("drop6", LayerKind::Dropout { ratio: 0.5 }, &fc6);
    let fc7 = net.add("fc7", LayerKind::Convolution(ConvParams::new(4096, 1)), &fc6);
    net.add_in_place("relu7", LayerKind::ReLU, &fc7);
    net.add_in_place("drop7", LayerKind::Dropout { ratio: 0.5 }, &fc7);
    let last = net.add(
        "final",
        LayerKind::Convolution(ConvParams::new(classes, 1)),
        &fc7,
    );
    (last.clone(), last)
}

fn add_upsample(net: &mut NetSpec, bottom: &str, classes: usize) -> String {
    let conv = ConvParams {
        stride: 8,
        pad: 4,
        group: classes,
        bias: false,
        frozen: true,
        weight_filler: Some("bilinear"),
        ..ConvParams::new(classes, 16)
    };
    net.add("upsample", LayerKind::Deconvolution(conv), bottom)
}
