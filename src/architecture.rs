//! Architecture descriptions.
//!
//! An [`ArchitectureConfig`] is a serializable list of [`LayerConfig`] entries.
//! It is validated before any layer is built, so construction never hits a
//! layer's internal assertions. The same description is embedded in saved
//! model artifacts.
//!
//! ```json
//! {
//!   "layer_type": "conv2d",
//!   "in_channels": 1,
//!   "out_channels": 64,
//!   "kernel_size": 3,
//!   "padding": 0,
//!   "stride": 1,
//!   "input_height": 28,
//!   "input_width": 28,
//!   "activation": "relu"
//! }
//! ```

use crate::data::{ImageDataFormat, IMG_COLS, IMG_ROWS, NUM_CLASSES};
use crate::error::{Error, Result};
use crate::layers::batchnorm::{DEFAULT_EPSILON, DEFAULT_MOMENTUM};
use crate::layers::{
    BatchNormLayer, Conv2DLayer, DenseLayer, DropoutLayer, FlattenLayer, Layer, MaxPool2DLayer,
};
use crate::utils::{Activation, SimpleRng};
use serde::{Deserialize, Serialize};

/// Configuration for a single layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer_type", rename_all = "snake_case")]
pub enum LayerConfig {
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: usize,
        stride: usize,
        input_height: usize,
        input_width: usize,
        activation: Activation,
    },
    /// `spatial` is 1 after dense layers and `H·W` after convolutions.
    BatchNorm {
        channels: usize,
        spatial: usize,
        epsilon: f32,
        momentum: f32,
    },
    MaxPool2d {
        channels: usize,
        input_height: usize,
        input_width: usize,
        pool_size: usize,
    },
    Dropout {
        size: usize,
        drop_rate: f32,
    },
    Flatten {
        channels: usize,
        height: usize,
        width: usize,
    },
    Dense {
        input_size: usize,
        output_size: usize,
        activation: Activation,
    },
}

fn conv_extent(input: usize, kernel: usize, padding: usize, stride: usize) -> usize {
    (input + 2 * padding - kernel) / stride + 1
}

impl LayerConfig {
    /// Display name used in model summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            LayerConfig::Conv2d { .. } => "Conv2D",
            LayerConfig::BatchNorm { .. } => "BatchNormalization",
            LayerConfig::MaxPool2d { .. } => "MaxPooling2D",
            LayerConfig::Dropout { .. } => "Dropout",
            LayerConfig::Flatten { .. } => "Flatten",
            LayerConfig::Dense { .. } => "Dense",
        }
    }

    /// Base of the per-model unique layer name (`conv2d`, `conv2d_1`, ...).
    pub fn name_prefix(&self) -> &'static str {
        match self {
            LayerConfig::Conv2d { .. } => "conv2d",
            LayerConfig::BatchNorm { .. } => "batch_normalization",
            LayerConfig::MaxPool2d { .. } => "max_pooling2d",
            LayerConfig::Dropout { .. } => "dropout",
            LayerConfig::Flatten { .. } => "flatten",
            LayerConfig::Dense { .. } => "dense",
        }
    }

    pub fn input_size(&self) -> usize {
        match *self {
            LayerConfig::Conv2d {
                in_channels,
                input_height,
                input_width,
                ..
            } => in_channels * input_height * input_width,
            LayerConfig::BatchNorm {
                channels, spatial, ..
            } => channels * spatial,
            LayerConfig::MaxPool2d {
                channels,
                input_height,
                input_width,
                ..
            } => channels * input_height * input_width,
            LayerConfig::Dropout { size, .. } => size,
            LayerConfig::Flatten {
                channels,
                height,
                width,
            } => channels * height * width,
            LayerConfig::Dense { input_size, .. } => input_size,
        }
    }

    /// Output features per sample. Call [`LayerConfig::validate`] first.
    pub fn output_size(&self) -> usize {
        match *self {
            LayerConfig::Conv2d {
                out_channels,
                kernel_size,
                padding,
                stride,
                input_height,
                input_width,
                ..
            } => {
                out_channels
                    * conv_extent(input_height, kernel_size, padding, stride)
                    * conv_extent(input_width, kernel_size, padding, stride)
            }
            LayerConfig::MaxPool2d {
                channels,
                input_height,
                input_width,
                pool_size,
            } => channels * (input_height / pool_size) * (input_width / pool_size),
            LayerConfig::Dense { output_size, .. } => output_size,
            _ => self.input_size(),
        }
    }

    /// Channels-first output shape given the channels-first input shape.
    pub fn output_shape(&self, input_shape: &[usize]) -> Vec<usize> {
        match *self {
            LayerConfig::Conv2d {
                out_channels,
                kernel_size,
                padding,
                stride,
                input_height,
                input_width,
                ..
            } => vec![
                out_channels,
                conv_extent(input_height, kernel_size, padding, stride),
                conv_extent(input_width, kernel_size, padding, stride),
            ],
            LayerConfig::MaxPool2d {
                channels,
                input_height,
                input_width,
                pool_size,
            } => vec![channels, input_height / pool_size, input_width / pool_size],
            LayerConfig::Flatten { .. } => vec![self.output_size()],
            LayerConfig::Dense { output_size, .. } => vec![output_size],
            LayerConfig::BatchNorm { .. } | LayerConfig::Dropout { .. } => input_shape.to_vec(),
        }
    }

    /// Check ranges and that the layer can be constructed.
    pub fn validate(&self, index: usize) -> Result<()> {
        let fail = |msg: String| Err(Error::Architecture(format!("layer {index}: {msg}")));

        match *self {
            LayerConfig::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                padding,
                stride,
                input_height,
                input_width,
                ..
            } => {
                if in_channels == 0 || out_channels == 0 {
                    return fail("Conv2D channels must be greater than 0".into());
                }
                if kernel_size == 0 {
                    return fail("kernel_size must be greater than 0".into());
                }
                if stride == 0 {
                    return fail("stride must be greater than 0".into());
                }
                if input_height + 2 * padding < kernel_size || input_width + 2 * padding < kernel_size
                {
                    return fail(format!(
                        "kernel {kernel_size}x{kernel_size} does not fit input {input_height}x{input_width}"
                    ));
                }
            }
            LayerConfig::BatchNorm {
                channels,
                spatial,
                epsilon,
                momentum,
            } => {
                if channels == 0 || spatial == 0 {
                    return fail("BatchNorm size must be greater than 0".into());
                }
                if !(epsilon > 0.0) {
                    return fail(format!("epsilon must be positive, got {epsilon}"));
                }
                if !(0.0..=1.0).contains(&momentum) {
                    return fail(format!("momentum must be in [0.0, 1.0], got {momentum}"));
                }
            }
            LayerConfig::MaxPool2d {
                channels,
                input_height,
                input_width,
                pool_size,
            } => {
                if channels == 0 || pool_size == 0 {
                    return fail("MaxPooling2D channels and pool_size must be greater than 0".into());
                }
                if input_height < pool_size || input_width < pool_size {
                    return fail(format!(
                        "pool {pool_size}x{pool_size} does not fit input {input_height}x{input_width}"
                    ));
                }
            }
            LayerConfig::Dropout { size, drop_rate } => {
                if size == 0 {
                    return fail("Dropout size must be greater than 0".into());
                }
                if !(0.0..1.0).contains(&drop_rate) {
                    return fail(format!("drop_rate must be in [0.0, 1.0), got {drop_rate}"));
                }
            }
            LayerConfig::Flatten {
                channels,
                height,
                width,
            } => {
                if channels * height * width == 0 {
                    return fail("Flatten dimensions must be greater than 0".into());
                }
            }
            LayerConfig::Dense {
                input_size,
                output_size,
                ..
            } => {
                if input_size == 0 {
                    return fail("input_size must be greater than 0".into());
                }
                if output_size == 0 {
                    return fail("output_size must be greater than 0".into());
                }
            }
        }
        Ok(())
    }

    /// Construct the layer. Weights are drawn from `rng`.
    pub fn build(&self, rng: &mut SimpleRng) -> Box<dyn Layer> {
        match *self {
            LayerConfig::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                padding,
                stride,
                input_height,
                input_width,
                activation,
            } => Box::new(Conv2DLayer::new(
                in_channels,
                out_channels,
                kernel_size,
                padding,
                stride,
                input_height,
                input_width,
                activation,
                rng,
            )),
            LayerConfig::BatchNorm {
                channels,
                spatial,
                epsilon,
                momentum,
            } => Box::new(BatchNormLayer::new(channels, spatial, epsilon, momentum)),
            LayerConfig::MaxPool2d {
                channels,
                input_height,
                input_width,
                pool_size,
            } => Box::new(MaxPool2DLayer::new(
                channels,
                input_height,
                input_width,
                pool_size,
            )),
            LayerConfig::Dropout { size, drop_rate } => {
                Box::new(DropoutLayer::new(size, drop_rate, rng))
            }
            LayerConfig::Flatten {
                channels,
                height,
                width,
            } => Box::new(FlattenLayer::new(channels, height, width)),
            LayerConfig::Dense {
                input_size,
                output_size,
                activation,
            } => Box::new(DenseLayer::new(input_size, output_size, activation, rng)),
        }
    }
}

/// A whole network: input shape (channels-first) plus the ordered layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    /// `[channels, height, width]`
    pub input_shape: [usize; 3],
    /// Ordering used when reporting shapes.
    pub image_data_format: ImageDataFormat,
    pub layers: Vec<LayerConfig>,
}

impl ArchitectureConfig {
    pub fn input_size(&self) -> usize {
        self.input_shape.iter().product()
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, LayerConfig::output_size)
    }

    /// Checks that:
    /// - there is at least one layer
    /// - every layer is individually valid
    /// - the first layer consumes `input_shape`
    /// - layer `i`'s output size equals layer `i + 1`'s input size
    pub fn validate(&self) -> Result<()> {
        let first = self.layers.first().ok_or_else(|| {
            Error::Architecture("architecture must have at least one layer".to_string())
        })?;

        for (i, layer) in self.layers.iter().enumerate() {
            layer.validate(i)?;
        }

        if first.input_size() != self.input_size() {
            return Err(Error::Architecture(format!(
                "layer 0 input size ({}) does not match input shape {:?}",
                first.input_size(),
                self.input_shape
            )));
        }

        for (i, pair) in self.layers.windows(2).enumerate() {
            let (current, next) = (&pair[0], &pair[1]);
            if current.output_size() != next.input_size() {
                return Err(Error::Architecture(format!(
                    "layer {} output size ({}) does not match layer {} input size ({})",
                    i,
                    current.output_size(),
                    i + 1,
                    next.input_size()
                )));
            }
        }

        Ok(())
    }

    /// Validate, then build every layer in order.
    pub fn build_layers(&self, rng: &mut SimpleRng) -> Result<Vec<Box<dyn Layer>>> {
        self.validate()?;
        Ok(self.layers.iter().map(|layer| layer.build(rng)).collect())
    }

    /// Unique layer names: `conv2d`, `conv2d_1`, `dense`, `dense_1`, ...
    pub fn layer_names(&self) -> Vec<String> {
        let mut seen: Vec<(&'static str, usize)> = Vec::new();
        self.layers
            .iter()
            .map(|layer| {
                let prefix = layer.name_prefix();
                match seen.iter_mut().find(|(p, _)| *p == prefix) {
                    Some((_, count)) => {
                        *count += 1;
                        format!("{prefix}_{count}")
                    }
                    None => {
                        seen.push((prefix, 0));
                        prefix.to_string()
                    }
                }
            })
            .collect()
    }

    /// Channels-first output shape of every layer.
    pub fn output_shapes(&self) -> Vec<Vec<usize>> {
        let mut shape = self.input_shape.to_vec();
        self.layers
            .iter()
            .map(|layer| {
                shape = layer.output_shape(&shape);
                shape.clone()
            })
            .collect()
    }
}

/// The fixed MNIST classifier:
///
/// 2 × [Conv2D 64@3×3 ReLU → BatchNorm → MaxPool 2×2 → Dropout 0.25],
/// Flatten, 3 × [Dense 128 ReLU → BatchNorm → Dropout 0.5], Dense 10 softmax.
pub fn mnist_cnn(image_data_format: ImageDataFormat) -> ArchitectureConfig {
    const FILTERS: usize = 64;
    const KERNEL: usize = 3;
    const POOL: usize = 2;
    const HIDDEN: usize = 128;

    let mut layers = Vec::new();
    let (mut channels, mut height, mut width) = (1, IMG_ROWS, IMG_COLS);

    for _ in 0..2 {
        layers.push(LayerConfig::Conv2d {
            in_channels: channels,
            out_channels: FILTERS,
            kernel_size: KERNEL,
            padding: 0,
            stride: 1,
            input_height: height,
            input_width: width,
            activation: Activation::Relu,
        });
        channels = FILTERS;
        height = conv_extent(height, KERNEL, 0, 1);
        width = conv_extent(width, KERNEL, 0, 1);

        layers.push(LayerConfig::BatchNorm {
            channels,
            spatial: height * width,
            epsilon: DEFAULT_EPSILON,
            momentum: DEFAULT_MOMENTUM,
        });
        layers.push(LayerConfig::MaxPool2d {
            channels,
            input_height: height,
            input_width: width,
            pool_size: POOL,
        });
        height /= POOL;
        width /= POOL;
        layers.push(LayerConfig::Dropout {
            size: channels * height * width,
            drop_rate: 0.25,
        });
    }

    layers.push(LayerConfig::Flatten {
        channels,
        height,
        width,
    });

    let mut features = channels * height * width;
    for _ in 0..3 {
        layers.push(LayerConfig::Dense {
            input_size: features,
            output_size: HIDDEN,
            activation: Activation::Relu,
        });
        features = HIDDEN;
        layers.push(LayerConfig::BatchNorm {
            channels: HIDDEN,
            spatial: 1,
            epsilon: DEFAULT_EPSILON,
            momentum: DEFAULT_MOMENTUM,
        });
        layers.push(LayerConfig::Dropout {
            size: HIDDEN,
            drop_rate: 0.5,
        });
    }

    layers.push(LayerConfig::Dense {
        input_size: features,
        output_size: NUM_CLASSES,
        activation: Activation::Softmax,
    });

    ArchitectureConfig {
        input_shape: [1, IMG_ROWS, IMG_COLS],
        image_data_format,
        layers,
    }
}
