//! Sequential model: a validated layer stack plus loss, optimizer and metrics.

use crate::architecture::ArchitectureConfig;
use crate::callbacks::{Callback, EpochLogs};
use crate::data::ImageDataFormat;
use crate::error::{Error, Result};
use crate::layers::{Layer, ParamTensor};
use crate::loss::{correct_count, Loss};
use crate::optimizers::{Optimizer, OptimizerConfig};
use crate::utils::{Activation, SimpleRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub const DEFAULT_LEARNING_RATE: f32 = 0.01;

/// Loss, optimizer and metrics attached to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub loss: Loss,
    pub optimizer: OptimizerConfig,
    pub metrics: Vec<String>,
}

impl Default for CompileConfig {
    /// Categorical cross-entropy, plain SGD at 0.01, accuracy.
    fn default() -> Self {
        Self {
            loss: Loss::CategoricalCrossentropy,
            optimizer: OptimizerConfig::Sgd {
                learning_rate: DEFAULT_LEARNING_RATE,
                iterations: 0,
            },
            metrics: vec!["accuracy".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub batch_size: usize,
    pub epochs: usize,
}

/// Per-epoch training metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub loss: Vec<f32>,
    pub accuracy: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    /// Fraction in `[0, 1]`.
    pub accuracy: f32,
}

pub struct Sequential {
    architecture: ArchitectureConfig,
    layers: Vec<Box<dyn Layer>>,
    loss: Loss,
    metrics: Vec<String>,
    optimizer: Box<dyn Optimizer>,
    // Output of every layer for the current batch.
    activations: Vec<Vec<f32>>,
    // grads[i] = dLoss/d(input of layer i); grads[n] = dLoss/d(model output).
    grads: Vec<Vec<f32>>,
}

impl Sequential {
    /// Validate `architecture`, build its layers with weights drawn from `rng`,
    /// and attach `compile`.
    pub fn new(
        architecture: ArchitectureConfig,
        compile: CompileConfig,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let layers = architecture.build_layers(rng)?;
        let n = layers.len();
        log::info!(
            "built model: {} layers, {} parameters",
            n,
            layers
                .iter()
                .map(|l| l.parameter_count() + l.non_trainable_count())
                .sum::<usize>()
        );

        Ok(Self {
            architecture,
            layers,
            loss: compile.loss,
            metrics: compile.metrics,
            optimizer: compile.optimizer.build(),
            activations: vec![Vec::new(); n],
            grads: vec![Vec::new(); n + 1],
        })
    }

    pub fn architecture(&self) -> &ArchitectureConfig {
        &self.architecture
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Current compile settings, including the optimizer step count.
    pub fn compile_config(&self) -> CompileConfig {
        CompileConfig {
            loss: self.loss,
            optimizer: self.optimizer.config(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn input_size(&self) -> usize {
        self.architecture.input_size()
    }

    pub fn output_size(&self) -> usize {
        self.architecture.output_size()
    }

    /// Stored tensors of every layer, in layer order.
    pub fn state(&self) -> Vec<Vec<ParamTensor>> {
        self.layers.iter().map(|l| l.state()).collect()
    }

    /// Restore tensors produced by [`Sequential::state`].
    pub fn load_state(&mut self, state: &[Vec<ParamTensor>]) -> Result<()> {
        if state.len() != self.layers.len() {
            return Err(Error::Artifact(format!(
                "{} layer states for {} layers",
                state.len(),
                self.layers.len()
            )));
        }
        for (i, (layer, tensors)) in self.layers.iter_mut().zip(state.iter()).enumerate() {
            layer.load_state(tensors).map_err(|e| match e {
                Error::Artifact(msg) => Error::Artifact(format!("layer {i}: {msg}")),
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn set_training(&mut self, training: bool) {
        for layer in self.layers.iter_mut() {
            layer.set_training(training);
        }
    }

    fn forward(&mut self, input: &[f32], batch_size: usize) {
        for i in 0..self.layers.len() {
            let out_len = batch_size * self.layers[i].output_size();
            self.activations[i].resize(out_len, 0.0);
            let (done, rest) = self.activations.split_at_mut(i);
            let layer_input: &[f32] = if i == 0 { input } else { &done[i - 1] };
            self.layers[i].forward(layer_input, &mut rest[0], batch_size);
        }
    }

    /// With `softmax_logits`, `grads[n]` is taken at the last layer's logits.
    fn backward(&mut self, input: &[f32], batch_size: usize, softmax_logits: bool) {
        let last = self.layers.len() - 1;
        for i in (0..self.layers.len()).rev() {
            let in_len = batch_size * self.layers[i].input_size();
            let (lower, upper) = self.grads.split_at_mut(i + 1);
            lower[i].resize(in_len, 0.0);
            let layer_input: &[f32] = if i == 0 {
                input
            } else {
                &self.activations[i - 1]
            };
            let layer = &self.layers[i];
            if softmax_logits && i == last {
                layer.backward_pre_activation(layer_input, &upper[0], &mut lower[i], batch_size);
            } else {
                layer.backward(layer_input, &upper[0], &mut lower[i], batch_size);
            }
        }
    }

    /// One forward/backward/update step. Returns (summed loss, correct predictions).
    fn train_on_batch(&mut self, x: &[f32], y: &[f32], batch_size: usize) -> (f32, usize) {
        self.forward(x, batch_size);

        let n = self.layers.len();
        let cols = self.output_size();
        let predictions = &self.activations[n - 1];
        let loss_sum = self.loss.total(predictions, y, cols);
        let correct = correct_count(predictions, y, cols);

        self.grads[n].resize(predictions.len(), 0.0);
        let softmax_logits = self.layers[n - 1].output_activation() == Activation::Softmax;
        if softmax_logits {
            self.loss
                .softmax_gradient(predictions, y, &mut self.grads[n], batch_size);
        } else {
            self.loss
                .gradient(predictions, y, &mut self.grads[n], batch_size);
        }

        self.backward(x, batch_size, softmax_logits);

        for layer in self.layers.iter_mut() {
            layer.update_with_optimizer(self.optimizer.as_mut());
        }
        self.optimizer.finish_step();

        (loss_sum, correct)
    }

    fn check_inputs(&self, x: &[f32], y: &[f32]) -> Result<usize> {
        let cols = self.output_size();
        let samples = y.len() / cols;
        if y.len() != samples * cols || x.len() != samples * self.input_size() {
            return Err(Error::Dataset(format!(
                "{} input values and {} target values do not describe whole samples of {} -> {}",
                x.len(),
                y.len(),
                self.input_size(),
                cols
            )));
        }
        Ok(samples)
    }

    /// Train on channels-first inputs `x` and one-hot targets `y`.
    ///
    /// `epochs == 0` runs the begin hooks and returns without touching the weights.
    pub fn fit(
        &mut self,
        x: &[f32],
        y: &[f32],
        options: FitOptions,
        callbacks: &mut [&mut dyn Callback],
    ) -> Result<History> {
        assert!(options.batch_size > 0, "batch_size must be positive");
        let samples = self.check_inputs(x, y)?;
        if samples == 0 && options.epochs > 0 {
            return Err(Error::Dataset("no training samples".to_string()));
        }

        let in_size = self.input_size();
        let out_size = self.output_size();
        let steps = samples.div_ceil(options.batch_size);

        self.set_training(true);
        for cb in callbacks.iter_mut() {
            cb.on_train_begin(self, options.epochs)?;
        }

        let mut history = History::default();

        for epoch in 1..=options.epochs {
            for cb in callbacks.iter_mut() {
                cb.on_epoch_begin(epoch, options.epochs);
            }
            let start_time = Instant::now();

            let mut total_loss = 0.0f64;
            let mut total_correct = 0usize;

            for (step, start) in (0..samples).step_by(options.batch_size).enumerate() {
                let batch = options.batch_size.min(samples - start);
                let (loss_sum, correct) = self.train_on_batch(
                    &x[start * in_size..(start + batch) * in_size],
                    &y[start * out_size..(start + batch) * out_size],
                    batch,
                );
                total_loss += loss_sum as f64;
                total_correct += correct;

                for cb in callbacks.iter_mut() {
                    cb.on_batch_end(step + 1, steps, loss_sum / batch as f32);
                }
            }

            let logs = EpochLogs {
                epoch,
                epochs: options.epochs,
                steps,
                loss: (total_loss / samples as f64) as f32,
                accuracy: total_correct as f32 / samples as f32,
                seconds: start_time.elapsed().as_secs_f32(),
            };
            history.loss.push(logs.loss);
            history.accuracy.push(logs.accuracy);

            for cb in callbacks.iter_mut() {
                cb.on_epoch_end(&logs, self)?;
            }
        }

        Ok(history)
    }

    /// Loss and accuracy in inference mode.
    pub fn evaluate(&mut self, x: &[f32], y: &[f32], batch_size: usize) -> Result<Evaluation> {
        assert!(batch_size > 0, "batch_size must be positive");
        let samples = self.check_inputs(x, y)?;
        if samples == 0 {
            return Err(Error::Dataset("no samples to evaluate".to_string()));
        }

        let in_size = self.input_size();
        let cols = self.output_size();
        let n = self.layers.len();
        self.set_training(false);

        let mut total_loss = 0.0f64;
        let mut total_correct = 0usize;
        for start in (0..samples).step_by(batch_size) {
            let batch = batch_size.min(samples - start);
            let xb = &x[start * in_size..(start + batch) * in_size];
            let yb = &y[start * cols..(start + batch) * cols];

            self.forward(xb, batch);
            let predictions = &self.activations[n - 1];
            total_loss += self.loss.total(predictions, yb, cols) as f64;
            total_correct += correct_count(predictions, yb, cols);
        }

        Ok(Evaluation {
            loss: (total_loss / samples as f64) as f32,
            accuracy: total_correct as f32 / samples as f32,
        })
    }

    /// Layer table with output shapes and parameter counts.
    pub fn summary(&self) -> String {
        const RULE: &str =
            "_________________________________________________________________";
        const DOUBLE: &str =
            "=================================================================";

        let format = self.architecture.image_data_format;
        let shapes = self.architecture.output_shapes();
        let names = self.architecture.layer_names();

        let mut out = String::new();
        out.push_str("Model: \"sequential\"\n");
        out.push_str(RULE);
        out.push('\n');
        out.push_str(&format!(
            " {:<28}{:<26}{}\n",
            "Layer (type)", "Output Shape", "Param #"
        ));
        out.push_str(DOUBLE);
        out.push('\n');

        let mut trainable = 0usize;
        let mut non_trainable = 0usize;
        let rows = self.layers.iter().zip(shapes.iter()).zip(names.iter());
        for (i, ((layer, shape), name)) in rows.enumerate() {
            let config = layer.config();
            let params = layer.parameter_count() + layer.non_trainable_count();
            trainable += layer.parameter_count();
            non_trainable += layer.non_trainable_count();

            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!(
                " {:<28}{:<26}{}\n",
                format!("{} ({})", name, config.kind()),
                display_shape(shape, format),
                params
            ));
        }

        out.push_str(DOUBLE);
        out.push('\n');
        out.push_str(&format!("Total params: {}\n", trainable + non_trainable));
        out.push_str(&format!("Trainable params: {trainable}\n"));
        out.push_str(&format!("Non-trainable params: {non_trainable}\n"));
        out.push_str(RULE);
        out
    }
}

/// `(None, H, W, C)` or `(None, C, H, W)` for images, `(None, N)` for vectors.
fn display_shape(shape: &[usize], format: ImageDataFormat) -> String {
    let dims: Vec<usize> = match (shape, format) {
        ([c, h, w], ImageDataFormat::ChannelsLast) => vec![*h, *w, *c],
        _ => shape.to_vec(),
    };
    let inner: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    format!("(None, {})", inner.join(", "))
}
