//! The contract every layer in a [`crate::model::Sequential`] stack fulfils.

use crate::architecture::LayerConfig;
use crate::error::Result;
use crate::layers::ParamTensor;
use crate::optimizers::Optimizer;
use crate::utils::Activation;

/// Core trait for network layers.
///
/// Data flows through flat `f32` buffers holding `batch_size` samples back to
/// back. Image-shaped data is stored channels-first (`C × H × W` per sample).
///
/// Layers keep whatever they need for the backward pass (cached outputs,
/// normalized activations, pooling arg-max indices, dropout masks) behind
/// interior mutability, so `forward` and `backward` take `&self`.
///
/// # Example
///
/// ```ignore
/// let mut output = vec![0.0f32; batch_size * layer.output_size()];
/// layer.forward(&input, &mut output, batch_size);
///
/// let mut grad_input = vec![0.0f32; batch_size * layer.input_size()];
/// layer.backward(&input, &grad_output, &mut grad_input, batch_size);
/// layer.update_with_optimizer(&mut optimizer);
/// ```
pub trait Layer {
    /// Forward propagation.
    ///
    /// # Panics
    ///
    /// Panics if `input`/`output` do not hold exactly `batch_size` samples.
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize);

    /// Backward propagation for the most recent `forward` call.
    ///
    /// Overwrites `grad_input` with dLoss/dInput and accumulates parameter
    /// gradients internally until the next `update_with_optimizer`.
    fn backward(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    );

    /// Activation fused into this layer's output.
    fn output_activation(&self) -> Activation {
        Activation::Linear
    }

    /// Like [`Layer::backward`], but `grad_pre_activation` is already taken
    /// with respect to the output before [`Layer::output_activation`].
    fn backward_pre_activation(
        &self,
        input: &[f32],
        grad_pre_activation: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        self.backward(input, grad_pre_activation, grad_input, batch_size);
    }

    /// Apply and clear the accumulated gradients. Parameter-free layers do nothing.
    fn update_with_optimizer(&mut self, _optimizer: &mut dyn Optimizer) {}

    /// Switch between training and inference behaviour.
    fn set_training(&mut self, _training: bool) {}

    /// Number of input features per sample.
    fn input_size(&self) -> usize;

    /// Number of output features per sample.
    fn output_size(&self) -> usize;

    /// Trainable parameter count.
    fn parameter_count(&self) -> usize {
        0
    }

    /// Stored but non-trainable values (batch-norm moving statistics).
    fn non_trainable_count(&self) -> usize {
        0
    }

    /// The description this layer was built from.
    fn config(&self) -> LayerConfig;

    /// Copy out every stored tensor, trainable or not.
    fn state(&self) -> Vec<ParamTensor> {
        Vec::new()
    }

    /// Restore tensors produced by [`Layer::state`].
    fn load_state(&mut self, state: &[ParamTensor]) -> Result<()> {
        crate::layers::expect_no_state(state)
    }
}
