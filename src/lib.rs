//! MNIST Convolutional Network Library
//!
//! A small CPU neural-network library and the train/test pipeline for a fixed
//! convolutional digit classifier built on it.
//!
//! # Modules
//!
//! - `layers`: Layer trait and implementations (Conv2D, BatchNorm, MaxPool2D, Dropout, Flatten, Dense)
//! - `optimizers`: Optimizer trait and SGD
//! - `utils`: RNG, activation functions and the GEMM kernel
//! - `architecture`: Serializable architecture descriptions and the MNIST stack
//! - `model`: Sequential model with fit / evaluate / summary
//! - `loss`: Categorical cross-entropy and accuracy
//! - `data`: IDX loading and tensor preparation
//! - `persist`: Versioned model artifacts
//! - `summary`: Training metrics files
//! - `callbacks`: Training hooks and console progress
//! - `config`: Command-line configuration
//! - `commands`: Train and evaluate entry points

pub mod architecture;
pub mod callbacks;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod layers;
pub mod loss;
pub mod model;
pub mod optimizers;
pub mod persist;
pub mod summary;
pub mod utils;

pub use error::{Error, Result};
