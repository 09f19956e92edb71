//! Plain stochastic gradient descent: `parameter -= learning_rate * gradient`.

use crate::optimizers::{Optimizer, OptimizerConfig};

/// SGD without momentum or weight decay.
///
/// The only state is the step counter, which is kept so that a saved model
/// records how many updates produced its weights.
///
/// # Example
///
/// ```
/// use mnist_convnet::optimizers::{Optimizer, SGD};
///
/// let mut optimizer = SGD::new(0.1);
/// let mut params = vec![1.0, 2.0, 3.0];
/// optimizer.update(&mut params, &[0.1, 0.2, 0.3]);
/// assert!((params[0] - 0.99).abs() < 1e-6);
/// ```
pub struct SGD {
    learning_rate: f32,
    iterations: u64,
}

impl SGD {
    pub fn new(learning_rate: f32) -> Self {
        Self::with_iterations(learning_rate, 0)
    }

    pub fn with_iterations(learning_rate: f32, iterations: u64) -> Self {
        Self {
            learning_rate,
            iterations,
        }
    }
}

impl Optimizer for SGD {
    fn update(&mut self, parameters: &mut [f32], gradients: &[f32]) {
        assert_eq!(
            parameters.len(),
            gradients.len(),
            "Parameters and gradients must have the same length"
        );

        for (param, grad) in parameters.iter_mut().zip(gradients.iter()) {
            *param -= self.learning_rate * grad;
        }
    }

    fn finish_step(&mut self) {
        self.iterations += 1;
    }

    fn iterations(&self) -> u64 {
        self.iterations
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::Sgd {
            learning_rate: self.learning_rate,
            iterations: self.iterations,
        }
    }
}
