//! Non-overlapping 2D max pooling (window and stride both `pool_size`).
//!
//! The output is `floor(H / pool) × floor(W / pool)`; trailing rows and
//! columns that do not fill a window are dropped. The winning input position of
//! every window is remembered so `backward` can route the gradient to it.

use crate::architecture::LayerConfig;
use crate::layers::{assert_batch_len, Layer};
use std::cell::RefCell;

pub struct MaxPool2DLayer {
    channels: usize,
    input_height: usize,
    input_width: usize,
    pool_size: usize,
    argmax: RefCell<Vec<usize>>,
}

impl MaxPool2DLayer {
    pub fn new(channels: usize, input_height: usize, input_width: usize, pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be positive");
        assert!(
            input_height >= pool_size && input_width >= pool_size,
            "pool window {}x{} does not fit input {}x{}",
            pool_size,
            pool_size,
            input_height,
            input_width
        );

        Self {
            channels,
            input_height,
            input_width,
            pool_size,
            argmax: RefCell::new(Vec::new()),
        }
    }

    pub fn output_height(&self) -> usize {
        self.input_height / self.pool_size
    }

    pub fn output_width(&self) -> usize {
        self.input_width / self.pool_size
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl Layer for MaxPool2DLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        assert_batch_len("input", input.len(), batch_size * self.input_size());
        assert_batch_len("output", output.len(), batch_size * self.output_size());

        let (oh, ow) = (self.output_height(), self.output_width());
        let in_plane = self.input_height * self.input_width;
        let p = self.pool_size;

        let mut argmax = self.argmax.borrow_mut();
        argmax.resize(output.len(), 0);

        let planes = batch_size * self.channels;
        for plane in 0..planes {
            let in_base = plane * in_plane;
            let out_base = plane * oh * ow;
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut best_idx = in_base + oy * p * self.input_width + ox * p;
                    let mut best = input[best_idx];
                    for ky in 0..p {
                        let row = in_base + (oy * p + ky) * self.input_width + ox * p;
                        for kx in 0..p {
                            let idx = row + kx;
                            if input[idx] > best {
                                best = input[idx];
                                best_idx = idx;
                            }
                        }
                    }
                    let o = out_base + oy * ow + ox;
                    output[o] = best;
                    argmax[o] = best_idx;
                }
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
        assert_batch_len("grad_output", grad_output.len(), batch_size * self.output_size());
        assert_batch_len("grad_input", grad_input.len(), batch_size * self.input_size());

        let argmax = self.argmax.borrow();
        assert_batch_len("cached indices", argmax.len(), grad_output.len());

        grad_input.fill(0.0);
        for (&idx, &g) in argmax.iter().zip(grad_output.iter()) {
            grad_input[idx] += g;
        }
    }

    fn input_size(&self) -> usize {
        self.channels * self.input_height * self.input_width
    }

    fn output_size(&self) -> usize {
        self.channels * self.output_height() * self.output_width()
    }

    fn config(&self) -> LayerConfig {
        LayerConfig::MaxPool2d {
            channels: self.channels,
            input_height: self.input_height,
            input_width: self.input_width,
            pool_size: self.pool_size,
        }
    }
}
