//! Training metrics written next to the run for later inspection.
//!
//! Under `<log_dir>/train/`:
//!
//! - `graph.json`: architecture and compile settings, written once
//! - `scalars.csv`: `epoch,loss,accuracy,seconds`, one row per epoch
//! - `histograms.jsonl`: one record per layer tensor per epoch

use crate::callbacks::{Callback, EpochLogs};
use crate::error::{Error, Result};
use crate::model::Sequential;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const HISTOGRAM_BUCKETS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub std: f32,
    /// Bucket edges, `buckets + 1` values.
    pub edges: Vec<f32>,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Equal-width histogram over `[min, max]`. `None` for an empty slice.
    pub fn from_values(values: &[f32], buckets: usize) -> Option<Self> {
        if values.is_empty() || buckets == 0 {
            return None;
        }
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;

        let width = (max - min) / buckets as f32;
        let edges = (0..=buckets).map(|i| min + width * i as f32).collect();
        let mut counts = vec![0u64; buckets];
        for &v in values {
            let bucket = if width > 0.0 {
                (((v - min) / width) as usize).min(buckets - 1)
            } else {
                0
            };
            counts[bucket] += 1;
        }

        Some(Self {
            min,
            max,
            mean: mean as f32,
            std: var.sqrt() as f32,
            edges,
            counts,
        })
    }
}

#[derive(Serialize)]
struct HistogramRecord<'a> {
    epoch: usize,
    tag: String,
    #[serde(flatten)]
    histogram: &'a Histogram,
}

#[derive(Serialize)]
struct GraphRecord<'a> {
    architecture: &'a crate::architecture::ArchitectureConfig,
    compile: crate::model::CompileConfig,
}

/// [`Callback`] that writes the metrics files.
pub struct SummaryWriter {
    dir: PathBuf,
    scalars: Option<BufWriter<File>>,
    histograms: Option<BufWriter<File>>,
}

impl SummaryWriter {
    /// Files are created when training begins, not here.
    pub fn new(log_dir: &Path) -> Self {
        Self {
            dir: log_dir.join("train"),
            scalars: None,
            histograms: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn create(&self, name: &str) -> Result<BufWriter<File>> {
        let path = self.dir.join(name);
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        Ok(BufWriter::new(file))
    }

    fn write_histograms(&mut self, epoch: usize, model: &Sequential) -> Result<()> {
        let path = self.dir.join("histograms.jsonl");
        let Some(out) = self.histograms.as_mut() else {
            return Ok(());
        };
        let names = model.architecture().layer_names();
        for (layer, name) in model.layers().iter().zip(names.iter()) {
            for tensor in layer.state() {
                let Some(histogram) = Histogram::from_values(&tensor.values, HISTOGRAM_BUCKETS)
                else {
                    continue;
                };
                let record = HistogramRecord {
                    epoch,
                    tag: format!("{}/{}", name, tensor.name),
                    histogram: &histogram,
                };
                serde_json::to_writer(&mut *out, &record)?;
                writeln!(out).map_err(|e| Error::io(&path, e))?;
            }
        }
        out.flush().map_err(|e| Error::io(&path, e))
    }
}

impl Callback for SummaryWriter {
    fn on_train_begin(&mut self, model: &Sequential, _epochs: usize) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        let graph_path = self.dir.join("graph.json");
        let graph = GraphRecord {
            architecture: model.architecture(),
            compile: model.compile_config(),
        };
        let json = serde_json::to_vec_pretty(&graph)?;
        fs::write(&graph_path, json).map_err(|e| Error::io(&graph_path, e))?;

        let mut scalars = self.create("scalars.csv")?;
        writeln!(scalars, "epoch,loss,accuracy,seconds")
            .map_err(|e| Error::io(&self.dir.join("scalars.csv"), e))?;
        self.scalars = Some(scalars);
        self.histograms = Some(self.create("histograms.jsonl")?);

        log::info!("writing training metrics to {}", self.dir.display());
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, model: &Sequential) -> Result<()> {
        let path = self.dir.join("scalars.csv");
        if let Some(scalars) = self.scalars.as_mut() {
            writeln!(
                scalars,
                "{},{},{},{}",
                logs.epoch, logs.loss, logs.accuracy, logs.seconds
            )
            .and_then(|_| scalars.flush())
            .map_err(|e| Error::io(&path, e))?;
        }
        self.write_histograms(logs.epoch, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_histogram_buckets() {
        let values: Vec<f32> = (0..300).map(|i| i as f32 / 299.0).collect();
        let h = Histogram::from_values(&values, HISTOGRAM_BUCKETS).unwrap();

        assert_eq!(h.counts.len(), 30);
        assert_eq!(h.edges.len(), 31);
        assert_eq!(h.counts.iter().sum::<u64>(), 300);
        assert_eq!(h.min, 0.0);
        assert_eq!(h.max, 1.0);
        assert_relative_eq!(h.mean, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_histogram_constant_values() {
        let h = Histogram::from_values(&[1.0; 8], 30).unwrap();
        assert_eq!(h.counts[0], 8);
        assert_eq!(h.std, 0.0);
        assert!(Histogram::from_values(&[], 30).is_none());
    }
}
