//! Activation functions fused into Dense and Conv2D layers.
//!
//! Activations are applied in place on a layer's output buffer. The backward
//! helpers take the *activated* output, which the layers cache during forward.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    /// Row-wise softmax; a "row" is one sample's full output vector.
    Softmax,
}

impl Activation {
    /// Apply the activation in place on `rows` samples of `cols` values each.
    pub fn apply(self, data: &mut [f32], rows: usize, cols: usize) {
        match self {
            Activation::Linear => {}
            Activation::Relu => relu_inplace(data),
            Activation::Softmax => softmax_rows(data, rows, cols),
        }
    }

    /// Turn a gradient w.r.t. the activated output into a gradient w.r.t. the
    /// pre-activation, in place.
    pub fn backprop(self, output: &[f32], grad: &mut [f32], rows: usize, cols: usize) {
        assert_eq!(output.len(), grad.len(), "activation output/grad length mismatch");
        match self {
            Activation::Linear => {}
            Activation::Relu => {
                for (g, &y) in grad.iter_mut().zip(output.iter()) {
                    if y <= 0.0 {
                        *g = 0.0;
                    }
                }
            }
            Activation::Softmax => {
                // dz_i = p_i * (g_i - sum_j g_j p_j)
                for (p_row, g_row) in output
                    .chunks_exact(cols)
                    .zip(grad.chunks_exact_mut(cols))
                    .take(rows)
                {
                    let dot: f32 = p_row.iter().zip(g_row.iter()).map(|(p, g)| p * g).sum();
                    for (g, &p) in g_row.iter_mut().zip(p_row.iter()) {
                        *g = p * (*g - dot);
                    }
                }
            }
        }
    }
}

/// ReLU applied in place.
pub fn relu_inplace(data: &mut [f32]) {
    for value in data.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }
}

/// Row-wise softmax with max subtraction for numerical stability.
pub fn softmax_rows(outputs: &mut [f32], rows: usize, cols: usize) {
    if cols == 0 {
        return;
    }
    assert_eq!(outputs.len(), rows * cols, "outputs length mismatch in softmax_rows");

    for row in outputs.chunks_exact_mut(cols) {
        let max_value = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0f32;
        for value in row.iter_mut() {
            *value = (*value - max_value).exp();
            sum += *value;
        }

        let inv_sum = 1.0f32 / sum;
        for value in row.iter_mut() {
            *value *= inv_sum;
        }
    }
}
