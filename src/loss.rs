//! Categorical cross-entropy over softmax probabilities, and the accuracy metric.

use crate::data::argmax;
use serde::{Deserialize, Serialize};

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before the log.
pub const EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    CategoricalCrossentropy,
}

impl Loss {
    /// Summed (not averaged) loss over the `rows × cols` batch.
    pub fn total(self, predictions: &[f32], targets: &[f32], cols: usize) -> f32 {
        match self {
            Loss::CategoricalCrossentropy => categorical_crossentropy_sum(predictions, targets, cols),
        }
    }

    /// dLoss/dPrediction for the batch mean of the loss, written into `grad`.
    pub fn gradient(self, predictions: &[f32], targets: &[f32], grad: &mut [f32], rows: usize) {
        match self {
            Loss::CategoricalCrossentropy => {
                categorical_crossentropy_grad(predictions, targets, grad, rows)
            }
        }
    }

    /// dLoss/dLogits for a softmax output layer, written into `grad`.
    pub fn softmax_gradient(
        self,
        predictions: &[f32],
        targets: &[f32],
        grad: &mut [f32],
        rows: usize,
    ) {
        match self {
            Loss::CategoricalCrossentropy => {
                softmax_crossentropy_grad(predictions, targets, grad, rows)
            }
        }
    }
}

fn clip(p: f32) -> f32 {
    p.clamp(EPSILON, 1.0 - EPSILON)
}

/// `Σ_rows -Σ_j y_j·ln(clip(p_j))`
pub fn categorical_crossentropy_sum(predictions: &[f32], targets: &[f32], cols: usize) -> f32 {
    assert_eq!(
        predictions.len(),
        targets.len(),
        "predictions and targets must have the same length"
    );
    predictions
        .chunks_exact(cols)
        .zip(targets.chunks_exact(cols))
        .map(|(p, y)| {
            -p.iter()
                .zip(y.iter())
                .filter(|(_, t)| **t != 0.0)
                .map(|(&pi, &t)| t * clip(pi).ln())
                .sum::<f32>()
        })
        .sum()
}

/// Gradient of the mean loss: `-y / (clip(p)·rows)`.
///
/// Vanishes through the softmax Jacobian once the target probability underflows;
/// softmax outputs use [`softmax_crossentropy_grad`] instead.
pub fn categorical_crossentropy_grad(
    predictions: &[f32],
    targets: &[f32],
    grad: &mut [f32],
    rows: usize,
) {
    assert_eq!(predictions.len(), targets.len());
    assert_eq!(predictions.len(), grad.len());
    let scale = 1.0 / rows as f32;
    for ((g, &p), &y) in grad.iter_mut().zip(predictions.iter()).zip(targets.iter()) {
        *g = -y / clip(p) * scale;
    }
}

/// Gradient of the mean loss at the softmax logits: `(p - y) / rows`.
pub fn softmax_crossentropy_grad(
    predictions: &[f32],
    targets: &[f32],
    grad: &mut [f32],
    rows: usize,
) {
    assert_eq!(predictions.len(), targets.len());
    assert_eq!(predictions.len(), grad.len());
    let scale = 1.0 / rows as f32;
    for ((g, &p), &y) in grad.iter_mut().zip(predictions.iter()).zip(targets.iter()) {
        *g = (p - y) * scale;
    }
}

/// Number of rows whose arg-max matches the target's arg-max.
pub fn correct_count(predictions: &[f32], targets: &[f32], cols: usize) -> usize {
    predictions
        .chunks_exact(cols)
        .zip(targets.chunks_exact(cols))
        .filter(|(p, y)| argmax(p) == argmax(y))
        .count()
}
