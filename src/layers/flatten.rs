//! Collapses a `C × H × W` volume into a flat feature vector.
//!
//! Buffers are already contiguous per sample, so both directions are copies.

use crate::architecture::LayerConfig;
use crate::layers::{assert_batch_len, Layer};

pub struct FlattenLayer {
    channels: usize,
    height: usize,
    width: usize,
}

impl FlattenLayer {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }
}

impl Layer for FlattenLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        assert_batch_len("input", input.len(), batch_size * self.input_size());
        assert_batch_len("output", output.len(), batch_size * self.output_size());
        output.copy_from_slice(input);
    }

    fn backward(
        &self,
        _input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        assert_batch_len("grad_output", grad_output.len(), batch_size * self.output_size());
        grad_input.copy_from_slice(grad_output);
    }

    fn input_size(&self) -> usize {
        self.channels * self.height * self.width
    }

    fn output_size(&self) -> usize {
        self.input_size()
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::Flatten {
            channels: self.channels,
            height: self.height,
            width: self.width,
        }
    }
}
