//! 2D convolution layer with a fused activation.
//!
//! The convolution is lowered to a matrix product per sample: the input patch
//! matrix (im2col, `in_channels·k·k × out_h·out_w`) is multiplied by the filter
//! bank (`out_channels × in_channels·k·k`).

use crate::architecture::LayerConfig;
use crate::error::Result;
use crate::layers::{assert_batch_len, take_param, Layer, ParamTensor};
use crate::optimizers::Optimizer;
use crate::utils::matmul::gemm;
use crate::utils::{Activation, SimpleRng};
use std::cell::RefCell;

/// 2D convolutional layer with learnable filters.
///
/// # Fields
///
/// * `weights` - Filters laid out as `[out_channels][in_channels][kernel_size][kernel_size]`
/// * `biases` - One bias per output channel
/// * `cached_output` - Activated output of the last forward pass, needed to
///   backpropagate through the activation
///
/// # Example
///
/// ```
/// use mnist_convnet::layers::{Conv2DLayer, Layer};
/// use mnist_convnet::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let layer = Conv2DLayer::new(1, 64, 3, 0, 1, 28, 28, Activation::Relu, &mut rng);
/// assert_eq!(layer.output_height(), 26);
/// assert_eq!(layer.parameter_count(), 64 * 9 + 64);
/// ```
pub struct Conv2DLayer {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    padding: usize,
    stride: usize,
    input_height: usize,
    input_width: usize,
    activation: Activation,
    weights: Vec<f32>,
    biases: Vec<f32>,
    grad_weights: RefCell<Vec<f32>>,
    grad_biases: RefCell<Vec<f32>>,
    cached_output: RefCell<Vec<f32>>,
}

impl Conv2DLayer {
    /// Create a convolution with Glorot-uniform filters and zero biases.
    ///
    /// `limit = sqrt(6 / (fan_in + fan_out))` with
    /// `fan_in = in_channels·k²` and `fan_out = out_channels·k²`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: usize,
        stride: usize,
        input_height: usize,
        input_width: usize,
        activation: Activation,
        rng: &mut SimpleRng,
    ) -> Self {
        assert!(stride > 0, "stride must be positive");
        assert!(
            input_height + 2 * padding >= kernel_size && input_width + 2 * padding >= kernel_size,
            "kernel does not fit the padded input"
        );

        let fan_in = (in_channels * kernel_size * kernel_size) as f32;
        let fan_out = (out_channels * kernel_size * kernel_size) as f32;
        let limit = (6.0f32 / (fan_in + fan_out)).sqrt();

        let weight_count = out_channels * in_channels * kernel_size * kernel_size;
        let weights: Vec<f32> = (0..weight_count)
            .map(|_| rng.gen_range_f32(-limit, limit))
            .collect();

        Self {
            in_channels,
            out_channels,
            kernel_size,
            padding,
            stride,
            input_height,
            input_width,
            activation,
            weights,
            biases: vec![0.0f32; out_channels],
            grad_weights: RefCell::new(vec![0.0f32; weight_count]),
            grad_biases: RefCell::new(vec![0.0f32; out_channels]),
            cached_output: RefCell::new(Vec::new()),
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// `(input_height + 2·padding - kernel_size) / stride + 1`
    pub fn output_height(&self) -> usize {
        (self.input_height + 2 * self.padding - self.kernel_size) / self.stride + 1
    }

    /// `(input_width + 2·padding - kernel_size) / stride + 1`
    pub fn output_width(&self) -> usize {
        (self.input_width + 2 * self.padding - self.kernel_size) / self.stride + 1
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    fn patch_rows(&self) -> usize {
        self.in_channels * self.kernel_size * self.kernel_size
    }

    /// Source pixel for output position (oy, ox) and kernel tap (ky, kx), if inside the image.
    fn source_index(&self, oy: usize, ox: usize, ky: usize, kx: usize) -> Option<usize> {
        let iy = (oy * self.stride + ky).checked_sub(self.padding)?;
        let ix = (ox * self.stride + kx).checked_sub(self.padding)?;
        if iy < self.input_height && ix < self.input_width {
            Some(iy * self.input_width + ix)
        } else {
            None
        }
    }

    fn im2col(&self, image: &[f32], col: &mut [f32]) {
        let (out_h, out_w) = (self.output_height(), self.output_width());
        let out_spatial = out_h * out_w;
        let plane = self.input_height * self.input_width;
        let k = self.kernel_size;

        for ic in 0..self.in_channels {
            let channel = &image[ic * plane..(ic + 1) * plane];
            for ky in 0..k {
                for kx in 0..k {
                    let row = (ic * k + ky) * k + kx;
                    let dst = &mut col[row * out_spatial..(row + 1) * out_spatial];
                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            dst[oy * out_w + ox] = match self.source_index(oy, ox, ky, kx) {
                                Some(idx) => channel[idx],
                                None => 0.0,
                            };
                        }
                    }
                }
            }
        }
    }

    /// Scatter-add a patch-gradient matrix back onto image positions.
    fn col2im(&self, col: &[f32], image: &mut [f32]) {
        let (out_h, out_w) = (self.output_height(), self.output_width());
        let out_spatial = out_h * out_w;
        let plane = self.input_height * self.input_width;
        let k = self.kernel_size;

        image.fill(0.0);
        for ic in 0..self.in_channels {
            let channel = &mut image[ic * plane..(ic + 1) * plane];
            for ky in 0..k {
                for kx in 0..k {
                    let row = (ic * k + ky) * k + kx;
                    let src = &col[row * out_spatial..(row + 1) * out_spatial];
                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            if let Some(idx) = self.source_index(oy, ox, ky, kx) {
                                channel[idx] += src[oy * out_w + ox];
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Layer for Conv2DLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        let in_len = self.input_size();
        let out_len = self.output_size();
        assert_batch_len("input", input.len(), batch_size * in_len);
        assert_batch_len("output", output.len(), batch_size * out_len);

        let out_spatial = self.output_height() * self.output_width();
        let rows = self.patch_rows();
        let mut col = vec![0.0f32; rows * out_spatial];

        for (image, out) in input
            .chunks_exact(in_len)
            .zip(output.chunks_exact_mut(out_len))
        {
            self.im2col(image, &mut col);
            for (channel, &bias) in out.chunks_exact_mut(out_spatial).zip(self.biases.iter()) {
                channel.fill(bias);
            }
            gemm(
                self.out_channels,
                rows,
                out_spatial,
                1.0,
                &self.weights,
                (rows, 1),
                &col,
                (out_spatial, 1),
                1.0,
                out,
                (out_spatial, 1),
            );
        }

        self.activation.apply(output, batch_size, out_len);
        if self.activation != Activation::Linear {
            let mut cache = self.cached_output.borrow_mut();
            cache.clear();
            cache.extend_from_slice(output);
        }
    }

    fn backward(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        let in_len = self.input_size();
        let out_len = self.output_size();
        assert_batch_len("input", input.len(), batch_size * in_len);
        assert_batch_len("grad_output", grad_output.len(), batch_size * out_len);
        assert_batch_len("grad_input", grad_input.len(), batch_size * in_len);

        let mut grad_z = grad_output.to_vec();
        if self.activation != Activation::Linear {
            let cache = self.cached_output.borrow();
            self.activation
                .backprop(&cache, &mut grad_z, batch_size, out_len);
        }

        let out_spatial = self.output_height() * self.output_width();
        let rows = self.patch_rows();
        let mut col = vec![0.0f32; rows * out_spatial];
        let mut grad_col = vec![0.0f32; rows * out_spatial];

        let mut grad_w = self.grad_weights.borrow_mut();
        let mut grad_b = self.grad_biases.borrow_mut();

        for ((image, gz), gi) in input
            .chunks_exact(in_len)
            .zip(grad_z.chunks_exact(out_len))
            .zip(grad_input.chunks_exact_mut(in_len))
        {
            self.im2col(image, &mut col);

            // dW += dZ · colᵀ
            gemm(
                self.out_channels,
                out_spatial,
                rows,
                1.0,
                gz,
                (out_spatial, 1),
                &col,
                (1, out_spatial),
                1.0,
                &mut grad_w,
                (rows, 1),
            );

            for (g, channel) in grad_b.iter_mut().zip(gz.chunks_exact(out_spatial)) {
                *g += channel.iter().sum::<f32>();
            }

            // dcol = Wᵀ · dZ
            gemm(
                rows,
                self.out_channels,
                out_spatial,
                1.0,
                &self.weights,
                (1, rows),
                gz,
                (out_spatial, 1),
                0.0,
                &mut grad_col,
                (out_spatial, 1),
            );
            self.col2im(&grad_col, gi);
        }
    }

    fn update_with_optimizer(&mut self, optimizer: &mut dyn Optimizer) {
        let mut grad_w = self.grad_weights.borrow_mut();
        let mut grad_b = self.grad_biases.borrow_mut();

        optimizer.update(&mut self.weights, &grad_w);
        optimizer.update(&mut self.biases, &grad_b);

        grad_w.fill(0.0);
        grad_b.fill(0.0);
    }

    fn input_size(&self) -> usize {
        self.in_channels * self.input_height * self.input_width
    }

    fn output_size(&self) -> usize {
        self.out_channels * self.output_height() * self.output_width()
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::Conv2d {
            in_channels: self.in_channels,
            out_channels: self.out_channels,
            kernel_size: self.kernel_size,
            padding: self.padding,
            stride: self.stride,
            input_height: self.input_height,
            input_width: self.input_width,
            activation: self.activation,
        }
    }

    fn state(&self) -> Vec<ParamTensor> {
        vec![
            ParamTensor::new("kernel", &self.weights),
            ParamTensor::new("bias", &self.biases),
        ]
    }

    fn load_state(&mut self, state: &[ParamTensor]) -> Result<()> {
        let kernel = take_param(state, "kernel", self.weights.len())?;
        let bias = take_param(state, "bias", self.biases.len())?;
        self.weights.copy_from_slice(kernel);
        self.biases.copy_from_slice(bias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_conv(in_c: usize, out_c: usize, k: usize, pad: usize, h: usize, w: usize) -> Conv2DLayer {
        let mut rng = SimpleRng::new(42);
        Conv2DLayer::new(in_c, out_c, k, pad, 1, h, w, Activation::Linear, &mut rng)
    }

    #[test]
    fn test_conv2d_output_dimensions_valid_padding() {
        let layer = linear_conv(1, 64, 3, 0, 28, 28);
        assert_eq!(layer.output_height(), 26);
        assert_eq!(layer.output_width(), 26);
        assert_eq!(layer.output_size(), 64 * 26 * 26);
    }

    #[test]
    fn test_conv2d_output_dimensions_same_padding() {
        let layer = linear_conv(1, 8, 3, 1, 28, 28);
        assert_eq!(layer.output_height(), 28);
        assert_eq!(layer.output_width(), 28);
    }

    #[test]
    fn test_conv2d_xavier_initialization_bounds() {
        let layer = linear_conv(1, 8, 3, 1, 28, 28);
        let limit = (6.0f32 / (9.0 + 72.0)).sqrt();
        assert!(layer.weights.iter().all(|w| w.abs() <= limit));
        assert!(layer.biases.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_conv2d_forward_known_values() {
        // 3x3 image, 2x2 all-ones kernel, bias 0.5 -> 2x2 sums of windows plus bias
        let mut layer = linear_conv(1, 1, 2, 0, 3, 3);
        layer.weights = vec![1.0; 4];
        layer.biases = vec![0.5];

        let input = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let mut output = vec![0.0; 4];
        layer.forward(&input, &mut output, 1);

        assert_eq!(output, vec![12.5, 16.5, 24.5, 28.5]);
    }

    #[test]
    fn test_conv2d_padding_reads_zeros() {
        let mut layer = linear_conv(1, 1, 3, 1, 1, 1);
        layer.weights = vec![1.0; 9];

        let mut output = vec![0.0; 1];
        layer.forward(&[2.0], &mut output, 1);

        assert_eq!(output, vec![2.0]);
    }

    #[test]
    fn test_conv2d_relu_output_is_non_negative() {
        let mut rng = SimpleRng::new(3);
        let layer = Conv2DLayer::new(2, 4, 3, 0, 1, 5, 5, Activation::Relu, &mut rng);
        let input: Vec<f32> = (0..2 * 2 * 25).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut output = vec![0.0; 2 * layer.output_size()];

        layer.forward(&input, &mut output, 2);

        assert!(output.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_conv2d_backward_bias_gradient_is_spatial_sum() {
        let mut layer = linear_conv(1, 2, 2, 0, 3, 3);
        let input = vec![0.1; 9];
        let mut output = vec![0.0; layer.output_size()];
        layer.forward(&input, &mut output, 1);

        let grad_output = vec![1.0; layer.output_size()];
        let mut grad_input = vec![0.0; 9];
        layer.backward(&input, &grad_output, &mut grad_input, 1);

        assert_eq!(*layer.grad_biases.borrow(), vec![4.0, 4.0]);
        let before = layer.biases.clone();
        let mut sgd = crate::optimizers::SGD::new(1.0);
        layer.update_with_optimizer(&mut sgd);
        assert_eq!(layer.biases, vec![before[0] - 4.0, before[1] - 4.0]);
        assert!(layer.grad_biases.borrow().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_conv2d_state_round_trip() {
        let source = linear_conv(2, 3, 3, 0, 6, 6);
        let mut target = {
            let mut rng = SimpleRng::new(99);
            Conv2DLayer::new(2, 3, 3, 0, 1, 6, 6, Activation::Linear, &mut rng)
        };
        assert_ne!(source.weights, target.weights);

        target.load_state(&source.state()).unwrap();
        assert_eq!(source.weights, target.weights);
        assert_eq!(source.biases, target.biases);
    }

    #[test]
    fn test_conv2d_deterministic_initialization() {
        let layer1 = linear_conv(3, 16, 5, 2, 32, 32);
        let layer2 = linear_conv(3, 16, 5, 2, 32, 32);
        assert_eq!(layer1.weights, layer2.weights);
    }
}
