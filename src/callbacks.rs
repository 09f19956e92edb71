//! Hooks called by [`Sequential::fit`](crate::model::Sequential::fit).

use crate::error::Result;
use crate::model::Sequential;
use std::io::Write;

/// Metrics of one finished epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLogs {
    /// 1-based
    pub epoch: usize,
    pub epochs: usize,
    pub steps: usize,
    /// Sample-weighted mean loss over the epoch.
    pub loss: f32,
    pub accuracy: f32,
    pub seconds: f32,
}

pub trait Callback {
    fn on_train_begin(&mut self, _model: &Sequential, _epochs: usize) -> Result<()> {
        Ok(())
    }

    /// `epoch` is 1-based.
    fn on_epoch_begin(&mut self, _epoch: usize, _epochs: usize) {}

    fn on_batch_end(&mut self, _step: usize, _steps: usize, _loss: f32) {}

    fn on_epoch_end(&mut self, _logs: &EpochLogs, _model: &Sequential) -> Result<()> {
        Ok(())
    }
}

/// Keras-style epoch progress on stdout.
///
/// ```text
/// Epoch 1/20
/// 469/469 - 41s - loss: 0.4533 - accuracy: 0.8611
/// ```
#[derive(Debug, Default)]
pub struct ProgressLogger;

impl ProgressLogger {
    pub fn format_epoch(logs: &EpochLogs) -> String {
        format!(
            "{}/{} - {:.0}s - loss: {:.4} - accuracy: {:.4}",
            logs.steps, logs.steps, logs.seconds, logs.loss, logs.accuracy
        )
    }
}

impl Callback for ProgressLogger {
    fn on_epoch_begin(&mut self, epoch: usize, epochs: usize) {
        println!("Epoch {epoch}/{epochs}");
    }

    fn on_batch_end(&mut self, step: usize, steps: usize, loss: f32) {
        log::debug!("step {step}/{steps} batch loss {loss:.4}");
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, _model: &Sequential) -> Result<()> {
        println!("{}", Self::format_epoch(logs));
        std::io::stdout().flush().ok();
        Ok(())
    }
}
