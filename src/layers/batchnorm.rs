//! Batch normalization layer
//!
//! Normalizes each channel to zero mean and unit variance over the mini-batch,
//! then applies a learnable scale (gamma) and shift (beta):
//!
//! 1. Batch statistics per channel: mean μ and (biased) variance σ²
//! 2. Normalize: x̂ = (x - μ) / sqrt(σ² + ε)
//! 3. Scale and shift: y = γ·x̂ + β
//!
//! A channel is one feature for dense inputs (`spatial == 1`) or one feature
//! map for convolutional inputs, in which case statistics are pooled over the
//! batch and every spatial position. During training the moving statistics
//! follow `moving = momentum·moving + (1 - momentum)·batch`; inference
//! normalizes with the moving statistics instead.
//!
//! # References
//!
//! Ioffe, S., & Szegedy, C. (2015). Batch Normalization: Accelerating Deep Network Training
//! by Reducing Internal Covariate Shift. ICML.

use crate::architecture::LayerConfig;
use crate::error::Result;
use crate::layers::{assert_batch_len, take_param, Layer, ParamTensor};
use crate::optimizers::Optimizer;
use std::cell::RefCell;

/// Default ε added to the variance.
pub const DEFAULT_EPSILON: f32 = 1e-3;
/// Default momentum of the moving statistics.
pub const DEFAULT_MOMENTUM: f32 = 0.99;

/// Batch normalization over `channels × spatial` values per sample.
///
/// # Example
///
/// ```
/// use mnist_convnet::layers::{BatchNormLayer, Layer};
///
/// // 64 feature maps of 26×26
/// let layer = BatchNormLayer::new(64, 26 * 26, 1e-3, 0.99);
/// assert_eq!(layer.input_size(), 64 * 676);
/// assert_eq!(layer.parameter_count(), 128);
/// assert_eq!(layer.non_trainable_count(), 128);
/// ```
pub struct BatchNormLayer {
    channels: usize,
    spatial: usize,
    epsilon: f32,
    momentum: f32,
    training: bool,

    gamma: Vec<f32>,
    beta: Vec<f32>,
    grad_gamma: RefCell<Vec<f32>>,
    grad_beta: RefCell<Vec<f32>>,

    // Updated from inside `forward`, hence the RefCell.
    moving_mean: RefCell<Vec<f32>>,
    moving_var: RefCell<Vec<f32>>,

    // Saved by the last training forward pass for `backward`.
    cached_normalized: RefCell<Vec<f32>>,
    cached_inv_std: RefCell<Vec<f32>>,
}

impl BatchNormLayer {
    /// Create a layer with γ = 1, β = 0, moving mean 0 and moving variance 1.
    /// The layer starts in training mode.
    pub fn new(channels: usize, spatial: usize, epsilon: f32, momentum: f32) -> Self {
        assert!(epsilon > 0.0, "epsilon must be positive");
        assert!(
            (0.0..=1.0).contains(&momentum),
            "momentum must be in range [0.0, 1.0]"
        );
        assert!(channels > 0 && spatial > 0, "batchnorm dimensions must be positive");

        Self {
            channels,
            spatial,
            epsilon,
            momentum,
            training: true,
            gamma: vec![1.0f32; channels],
            beta: vec![0.0f32; channels],
            grad_gamma: RefCell::new(vec![0.0f32; channels]),
            grad_beta: RefCell::new(vec![0.0f32; channels]),
            moving_mean: RefCell::new(vec![0.0f32; channels]),
            moving_var: RefCell::new(vec![1.0f32; channels]),
            cached_normalized: RefCell::new(Vec::new()),
            cached_inv_std: RefCell::new(Vec::new()),
        }
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn gamma(&self) -> &[f32] {
        &self.gamma
    }

    pub fn beta(&self) -> &[f32] {
        &self.beta
    }

    pub fn moving_mean(&self) -> Vec<f32> {
        self.moving_mean.borrow().clone()
    }

    pub fn moving_var(&self) -> Vec<f32> {
        self.moving_var.borrow().clone()
    }

    /// Offsets of the `spatial`-long runs that belong to `channel`, one per sample.
    fn channel_runs(&self, channel: usize, batch_size: usize) -> impl Iterator<Item = usize> {
        let stride = self.channels * self.spatial;
        let offset = channel * self.spatial;
        (0..batch_size).map(move |b| b * stride + offset)
    }
}

impl Layer for BatchNormLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        let total_size = batch_size * self.input_size();
        assert_batch_len("input", input.len(), total_size);
        assert_batch_len("output", output.len(), total_size);

        let s = self.spatial;

        if !self.training {
            let moving_mean = self.moving_mean.borrow();
            let moving_var = self.moving_var.borrow();
            for c in 0..self.channels {
                let inv_std = 1.0 / (moving_var[c] + self.epsilon).sqrt();
                let scale = self.gamma[c] * inv_std;
                let shift = self.beta[c] - moving_mean[c] * scale;
                for start in self.channel_runs(c, batch_size) {
                    for i in start..start + s {
                        output[i] = input[i] * scale + shift;
                    }
                }
            }
            return;
        }

        let count = (batch_size * s) as f32;
        let mut normalized = self.cached_normalized.borrow_mut();
        normalized.resize(total_size, 0.0);
        let mut inv_stds = self.cached_inv_std.borrow_mut();
        inv_stds.resize(self.channels, 0.0);
        let mut moving_mean = self.moving_mean.borrow_mut();
        let mut moving_var = self.moving_var.borrow_mut();

        for c in 0..self.channels {
            let mut sum = 0.0f32;
            for start in self.channel_runs(c, batch_size) {
                sum += input[start..start + s].iter().sum::<f32>();
            }
            let mean = sum / count;

            let mut sq = 0.0f32;
            for start in self.channel_runs(c, batch_size) {
                sq += input[start..start + s]
                    .iter()
                    .map(|&x| (x - mean) * (x - mean))
                    .sum::<f32>();
            }
            let var = sq / count;
            let inv_std = 1.0 / (var + self.epsilon).sqrt();

            for start in self.channel_runs(c, batch_size) {
                for i in start..start + s {
                    let x_hat = (input[i] - mean) * inv_std;
                    normalized[i] = x_hat;
                    output[i] = self.gamma[c] * x_hat + self.beta[c];
                }
            }

            inv_stds[c] = inv_std;
            moving_mean[c] = self.momentum * moving_mean[c] + (1.0 - self.momentum) * mean;
            moving_var[c] = self.momentum * moving_var[c] + (1.0 - self.momentum) * var;
        }
    }

    fn backward(
        &self,
        _input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        let total_size = batch_size * self.input_size();
        assert_batch_len("grad_output", grad_output.len(), total_size);
        assert_batch_len("grad_input", grad_input.len(), total_size);

        let s = self.spatial;

        if !self.training {
            let moving_var = self.moving_var.borrow();
            for c in 0..self.channels {
                let scale = self.gamma[c] / (moving_var[c] + self.epsilon).sqrt();
                for start in self.channel_runs(c, batch_size) {
                    for i in start..start + s {
                        grad_input[i] = grad_output[i] * scale;
                    }
                }
            }
            return;
        }

        let normalized = self.cached_normalized.borrow();
        let inv_stds = self.cached_inv_std.borrow();
        assert_batch_len("cached activations", normalized.len(), total_size);

        let mut grad_gamma = self.grad_gamma.borrow_mut();
        let mut grad_beta = self.grad_beta.borrow_mut();
        let count = (batch_size * s) as f32;

        for c in 0..self.channels {
            let mut sum_dy = 0.0f32;
            let mut sum_dy_xhat = 0.0f32;
            for start in self.channel_runs(c, batch_size) {
                for i in start..start + s {
                    sum_dy += grad_output[i];
                    sum_dy_xhat += grad_output[i] * normalized[i];
                }
            }
            grad_gamma[c] += sum_dy_xhat;
            grad_beta[c] += sum_dy;

            // dx = γ/(m·σ) · (m·dy - Σdy - x̂·Σ(dy·x̂))
            let k = self.gamma[c] * inv_stds[c] / count;
            for start in self.channel_runs(c, batch_size) {
                for i in start..start + s {
                    grad_input[i] =
                        k * (count * grad_output[i] - sum_dy - normalized[i] * sum_dy_xhat);
                }
            }
        }
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        let mut grad_gamma = self.grad_gamma.borrow_mut();
        let mut grad_beta = self.grad_beta.borrow_mut();

        optimizer.update(&mut self.gamma, &grad_gamma);
        optimizer.update(&mut self.beta, &grad_beta);

        grad_gamma.fill(0.0);
        grad_beta.fill(0.0);
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn input_size(&self) -> usize {
        self.channels * self.spatial
    }

    fn output_size(&self) -> usize {
        self.channels * self.spatial
    }

    fn parameter_count(&self) -> usize {
        2 * self.channels
    }

    fn non_trainable_count(&self) -> usize {
        2 * self.channels
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::BatchNorm {
            channels: self.channels,
            spatial: self.spatial,
            epsilon: self.epsilon,
            momentum: self.momentum,
        }
    }

    fn state(&self) -> Vec<ParamTensor> {
        vec![
            ParamTensor::new("gamma", &self.gamma),
            ParamTensor::new("beta", &self.beta),
            ParamTensor::new("moving_mean", &self.moving_mean.borrow()),
            ParamTensor::new("moving_variance", &self.moving_var.borrow()),
        ]
    }

    fn load_state(&mut self, state: &[ParamTensor]) -> Result<()> {
        let gamma = take_param(state, "gamma", self.channels)?;
        let beta = take_param(state, "beta", self.channels)?;
        let mean = take_param(state, "moving_mean", self.channels)?;
        let var = take_param(state, "moving_variance", self.channels)?;

        self.gamma.copy_from_slice(gamma);
        self.beta.copy_from_slice(beta);
        self.moving_mean.borrow_mut().copy_from_slice(mean);
        self.moving_var.borrow_mut().copy_from_slice(var);
        Ok(())
    }
}
