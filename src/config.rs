//! Command-line run configuration.

use crate::data::ImageDataFormat;
use clap::Parser;
use std::path::PathBuf;

/// Train or evaluate the MNIST convolutional classifier.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "mnist_cnn", version, about)]
pub struct RunConfig {
    /// `train` fits and saves the model, `test` loads and evaluates it.
    #[arg(long, default_value = "train")]
    pub mode: String,

    /// Samples per optimizer step (also used for evaluation).
    #[arg(long, default_value_t = 128, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: u64,

    /// Full passes over the training data.
    #[arg(long, default_value_t = 20)]
    pub epochs: usize,

    /// Where the model artifact is written and read.
    #[arg(long = "model_path", default_value = "models/mnist_cnn.keras")]
    pub model_path: PathBuf,

    /// Directory holding the four MNIST IDX files.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Root directory for training metrics.
    #[arg(long, default_value = "log_keras")]
    pub log_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = ImageDataFormat::ChannelsLast)]
    pub image_data_format: ImageDataFormat,

    /// Seed for weight initialization and dropout masks. Time-based when omitted.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RunConfig {
    pub fn batch_size(&self) -> usize {
        self.batch_size as usize
    }
}
