//! Optimizers that turn accumulated layer gradients into parameter updates.
//!
//! Layers own their gradient buffers and hand each parameter/gradient pair to
//! the optimizer through [`crate::layers::Layer::update_with_optimizer`]; the
//! model tells the optimizer when a full step over all layers is complete.

pub mod sgd;

pub use sgd::SGD;

use serde::{Deserialize, Serialize};

pub trait Optimizer {
    /// Apply the update rule to `parameters` in place.
    ///
    /// # Panics
    ///
    /// Implementations panic if `parameters` and `gradients` differ in length.
    fn update(&mut self, parameters: &mut [f32], gradients: &[f32]);

    /// Mark the end of one optimizer step (one mini-batch over every layer).
    fn finish_step(&mut self);

    /// Number of completed steps.
    fn iterations(&self) -> u64;

    fn learning_rate(&self) -> f32;

    /// Serializable description of the optimizer and its state.
    fn config(&self) -> OptimizerConfig;
}

/// Optimizer description stored in the compile section of a model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd { learning_rate: f32, iterations: u64 },
}

impl OptimizerConfig {
    pub fn build(&self) -> Box<dyn Optimizer> {
        match *self {
            OptimizerConfig::Sgd {
                learning_rate,
                iterations,
            } => Box::new(SGD::with_iterations(learning_rate, iterations)),
        }
    }
}
