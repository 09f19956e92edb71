//! Layer implementations for the MNIST convolutional network.
//!
//! - [`Conv2DLayer`]: 2D convolution with fused activation
//! - [`BatchNormLayer`]: per-channel batch normalization
//! - [`MaxPool2DLayer`]: non-overlapping max pooling
//! - [`DropoutLayer`]: inverted dropout
//! - [`FlattenLayer`]: collapses an image volume into a feature vector
//! - [`DenseLayer`]: fully connected layer with fused activation

mod r#trait;
pub mod batchnorm;
pub mod conv2d;
pub mod dense;
pub mod dropout;
pub mod flatten;
pub mod maxpool;

pub use batchnorm::BatchNormLayer;
pub use conv2d::Conv2DLayer;
pub use dense::DenseLayer;
pub use dropout::DropoutLayer;
pub use flatten::FlattenLayer;
pub use maxpool::MaxPool2DLayer;
pub use r#trait::Layer;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A named parameter (or statistic) tensor as stored in a model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    pub name: String,
    pub values: Vec<f32>,
}

impl ParamTensor {
    pub fn new(name: &str, values: &[f32]) -> Self {
        Self {
            name: name.to_string(),
            values: values.to_vec(),
        }
    }
}

/// Find tensor `name` in `state` and check it holds `len` finite values.
pub(crate) fn take_param<'a>(state: &'a [ParamTensor], name: &str, len: usize) -> Result<&'a [f32]> {
    let tensor = state
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::Artifact(format!("missing parameter '{name}'")))?;
    if tensor.values.len() != len {
        return Err(Error::Artifact(format!(
            "parameter '{}' has {} values, expected {}",
            name,
            tensor.values.len(),
            len
        )));
    }
    if tensor.values.iter().any(|v| !v.is_finite()) {
        return Err(Error::Artifact(format!(
            "parameter '{name}' contains non-finite values"
        )));
    }
    Ok(&tensor.values)
}

pub(crate) fn expect_no_state(state: &[ParamTensor]) -> Result<()> {
    match state.first() {
        None => Ok(()),
        Some(t) => Err(Error::Artifact(format!(
            "unexpected parameter '{}' for a parameter-free layer",
            t.name
        ))),
    }
}

pub(crate) fn assert_batch_len(what: &str, actual: usize, expected: usize) {
    assert_eq!(
        actual, expected,
        "{} len mismatch: expected {}, got {}",
        what, expected, actual
    );
}
