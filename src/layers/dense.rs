//! Dense (fully connected) layer: `output = activation(input × weights + biases)`

use crate::architecture::LayerConfig;
use crate::error::Result;
use crate::layers::{assert_batch_len, take_param, Layer, ParamTensor};
use crate::optimizers::Optimizer;
use crate::utils::matmul::gemm;
use crate::utils::{Activation, SimpleRng};
use std::cell::RefCell;

/// Dense layer with weights stored row-major as `input_size × output_size`.
///
/// # Example
///
/// ```
/// use mnist_convnet::layers::{DenseLayer, Layer};
/// use mnist_convnet::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let layer = DenseLayer::new(1600, 128, Activation::Relu, &mut rng);
/// assert_eq!(layer.parameter_count(), 1600 * 128 + 128);
/// ```
pub struct DenseLayer {
    input_size: usize,
    output_size: usize,
    activation: Activation,
    weights: Vec<f32>,
    biases: Vec<f32>,
    grad_weights: RefCell<Vec<f32>>,
    grad_biases: RefCell<Vec<f32>>,
    cached_output: RefCell<Vec<f32>>,
}

impl DenseLayer {
    /// Create a dense layer with Glorot-uniform weights and zero biases.
    pub fn new(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut SimpleRng,
    ) -> Self {
        let limit = (6.0f32 / (input_size + output_size) as f32).sqrt();
        let weights: Vec<f32> = (0..input_size * output_size)
            .map(|_| rng.gen_range_f32(-limit, limit))
            .collect();

        Self {
            input_size,
            output_size,
            activation,
            weights,
            biases: vec![0.0f32; output_size],
            grad_weights: RefCell::new(vec![0.0f32; input_size * output_size]),
            grad_biases: RefCell::new(vec![0.0f32; output_size]),
            cached_output: RefCell::new(Vec::new()),
        }
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn biases(&self) -> &[f32] {
        &self.biases
    }
}

impl Layer for DenseLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        assert_batch_len("input", input.len(), batch_size * self.input_size);
        assert_batch_len("output", output.len(), batch_size * self.output_size);

        for row in output.chunks_exact_mut(self.output_size) {
            row.copy_from_slice(&self.biases);
        }
        gemm(
            batch_size,
            self.input_size,
            self.output_size,
            1.0,
            input,
            (self.input_size, 1),
            &self.weights,
            (self.output_size, 1),
            1.0,
            output,
            (self.output_size, 1),
        );

        self.activation.apply(output, batch_size, self.output_size);
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
        assert_batch_len("grad_output", grad_output.len(), batch_size * self.output_size);

        let mut grad_z = grad_output.to_vec();
        if self.activation != Activation::Linear {
            let cache = self.cached_output.borrow();
            self.activation
                .backprop(&cache, &mut grad_z, batch_size, self.output_size);
        }
        self.backward_pre_activation(input, &grad_z, grad_input, batch_size);
    }

    fn output_activation(&self) -> Activation {
        self.activation
    }

    fn backward_pre_activation(
        &self,
        input: &[f32],
        grad_z: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        assert_batch_len("input", input.len(), batch_size * self.input_size);
        assert_batch_len("grad_z", grad_z.len(), batch_size * self.output_size);
        assert_batch_len("grad_input", grad_input.len(), batch_size * self.input_size);

        let mut grad_w = self.grad_weights.borrow_mut();
        let mut grad_b = self.grad_biases.borrow_mut();

        // dW += Xᵀ · dZ
        gemm(
            self.input_size,
            batch_size,
            self.output_size,
            1.0,
            input,
            (1, self.input_size),
            grad_z,
            (self.output_size, 1),
            1.0,
            &mut grad_w,
            (self.output_size, 1),
        );

        for row in grad_z.chunks_exact(self.output_size) {
            for (g, &dz) in grad_b.iter_mut().zip(row.iter()) {
                *g += dz;
            }
        }

        // dX = dZ · Wᵀ
        gemm(
            batch_size,
            self.output_size,
            self.input_size,
            1.0,
            grad_z,
            (self.output_size, 1),
            &self.weights,
            (1, self.output_size),
            0.0,
            grad_input,
            (self.input_size, 1),
        );
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
        self.input_size
    }

    fn output_size(&self) -> usize {
        self.output_size
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::Dense {
            input_size: self.input_size,
            output_size: self.output_size,
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
