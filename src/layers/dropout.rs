//! Inverted dropout.
//!
//! During training each unit is zeroed with probability `drop_rate` and the
//! survivors are scaled by `1 / (1 - drop_rate)`, so the expected activation is
//! unchanged and inference is a plain pass-through.

use crate::architecture::LayerConfig;
use crate::layers::{assert_batch_len, Layer};
use crate::utils::SimpleRng;
use std::cell::RefCell;

/// Dropout layer for regularization.
///
/// # Example
///
/// ```
/// use mnist_convnet::layers::{DropoutLayer, Layer};
/// use mnist_convnet::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let mut layer = DropoutLayer::new(128, 0.5, &mut rng);
/// assert!(layer.is_training());
/// layer.set_training(false);
/// assert_eq!(layer.parameter_count(), 0);
/// ```
pub struct DropoutLayer {
    size: usize,
    drop_rate: f32,
    training: bool,
    mask: RefCell<Vec<f32>>,
    rng: RefCell<SimpleRng>,
}

impl DropoutLayer {
    /// The layer draws its masks from a generator forked off `rng`.
    pub fn new(size: usize, drop_rate: f32, rng: &mut SimpleRng) -> Self {
        assert!(
            (0.0..1.0).contains(&drop_rate),
            "drop_rate must be in range [0.0, 1.0)"
        );

        Self {
            size,
            drop_rate,
            training: true,
            mask: RefCell::new(Vec::new()),
            rng: RefCell::new(rng.fork()),
        }
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn drop_rate(&self) -> f32 {
        self.drop_rate
    }
}

impl Layer for DropoutLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        let total_size = batch_size * self.size;
        assert_batch_len("input", input.len(), total_size);
        assert_batch_len("output", output.len(), total_size);

        if !self.training {
            output.copy_from_slice(input);
            return;
        }

        let scale = 1.0 / (1.0 - self.drop_rate);
        let mut mask = self.mask.borrow_mut();
        let mut rng = self.rng.borrow_mut();
        mask.resize(total_size, 0.0);

        for ((m, out), &x) in mask.iter_mut().zip(output.iter_mut()).zip(input.iter()) {
            if rng.next_f32() >= self.drop_rate {
                *m = scale;
                *out = x * scale;
            } else {
                *m = 0.0;
                *out = 0.0;
            }
        }
    }

    fn backward(
        &self,
        _input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        let total_size = batch_size * self.size;
        assert_batch_len("grad_output", grad_output.len(), total_size);
        assert_batch_len("grad_input", grad_input.len(), total_size);

        if !self.training {
            grad_input.copy_from_slice(grad_output);
            return;
        }

        let mask = self.mask.borrow();
        assert_batch_len("mask", mask.len(), total_size);
        for ((g, &dy), &m) in grad_input.iter_mut().zip(grad_output.iter()).zip(mask.iter()) {
            *g = dy * m;
        }
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn input_size(&self) -> usize {
        self.size
    }

    fn output_size(&self) -> usize {
        self.size
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::Dropout {
            size: self.size,
            drop_rate: self.drop_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "drop_rate must be in range [0.0, 1.0)")]
    fn test_rejects_rate_of_one() {
        let mut rng = SimpleRng::new(1);
        let _layer = DropoutLayer::new(4, 1.0, &mut rng);
    }

    #[test]
    fn test_inference_is_identity() {
        let mut rng = SimpleRng::new(1);
        let mut layer = DropoutLayer::new(4, 0.5, &mut rng);
        layer.set_training(false);

        let input = vec![1.0, -2.0, 3.0, -4.0];
        let mut output = vec![0.0; 4];
        layer.forward(&input, &mut output, 1);
        assert_eq!(output, input);
    }

    #[test]
    fn test_training_output_is_zero_or_scaled() {
        let mut rng = SimpleRng::new(7);
        let layer = DropoutLayer::new(1000, 0.25, &mut rng);
        let input = vec![1.0f32; 1000];
        let mut output = vec![0.0f32; 1000];
        layer.forward(&input, &mut output, 1);

        let scale = 1.0 / 0.75;
        assert!(output
            .iter()
            .all(|&v| v == 0.0 || (v - scale).abs() < 1e-6));

        let kept = output.iter().filter(|&&v| v != 0.0).count();
        assert!((650..=850).contains(&kept), "kept {kept}");
    }

    #[test]
    fn test_backward_reuses_forward_mask() {
        let mut rng = SimpleRng::new(3);
        let layer = DropoutLayer::new(64, 0.5, &mut rng);
        let input = vec![1.0f32; 64];
        let mut output = vec![0.0f32; 64];
        layer.forward(&input, &mut output, 1);

        let mut grad_input = vec![0.0f32; 64];
        layer.backward(&input, &vec![1.0f32; 64], &mut grad_input, 1);
        assert_eq!(grad_input, output);
    }

    #[test]
    fn test_sibling_layers_draw_different_masks() {
        let mut rng = SimpleRng::new(11);
        let a = DropoutLayer::new(256, 0.5, &mut rng);
        let b = DropoutLayer::new(256, 0.5, &mut rng);

        let input = vec![1.0f32; 256];
        let mut out_a = vec![0.0f32; 256];
        let mut out_b = vec![0.0f32; 256];
        a.forward(&input, &mut out_a, 1);
        b.forward(&input, &mut out_b, 1);
        assert_ne!(out_a, out_b);
    }
}
