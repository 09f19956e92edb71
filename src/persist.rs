//! Model artifacts: one versioned JSON document per model.
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "architecture": { "input_shape": [1, 28, 28], "image_data_format": "channels_last", "layers": [...] },
//!   "compile": { "loss": "categorical_crossentropy", "optimizer": {...}, "metrics": ["accuracy"] },
//!   "layers": [ { "params": [ { "name": "kernel", "values": [...] } ] } ]
//! }
//! ```

use crate::architecture::ArchitectureConfig;
use crate::error::{Error, Result};
use crate::layers::ParamTensor;
use crate::model::{CompileConfig, Sequential};
use crate::utils::SimpleRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    pub params: Vec<ParamTensor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub architecture: ArchitectureConfig,
    pub compile: CompileConfig,
    pub layers: Vec<LayerState>,
}

impl ModelArtifact {
    pub fn from_model(model: &Sequential) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            architecture: model.architecture().clone(),
            compile: model.compile_config(),
            layers: model
                .state()
                .into_iter()
                .map(|params| LayerState { params })
                .collect(),
        }
    }

    /// Serialize to `path`. Tensors holding NaN or infinity are refused, since
    /// JSON has no encoding for them.
    pub fn write(&self, path: &Path) -> Result<()> {
        for (i, layer) in self.layers.iter().enumerate() {
            if let Some(t) = layer
                .params
                .iter()
                .find(|t| t.values.iter().any(|v| !v.is_finite()))
            {
                return Err(Error::Artifact(format!(
                    "layer {i}: parameter '{}' contains non-finite values",
                    t.name
                )));
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let json = serde_json::to_vec(self)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    /// Rebuild the model this artifact describes.
    pub fn into_model(self) -> Result<Sequential> {
        if self.format_version != FORMAT_VERSION {
            return Err(Error::Artifact(format!(
                "format version {} is not supported (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        self.architecture
            .validate()
            .map_err(|e| Error::Artifact(e.to_string()))?;

        // Every stored tensor is overwritten below; the seed only shapes the
        // dropout mask streams.
        let mut rng = SimpleRng::new(FORMAT_VERSION as u64);
        let mut model = Sequential::new(self.architecture, self.compile, &mut rng)?;
        let state: Vec<Vec<ParamTensor>> = self.layers.into_iter().map(|l| l.params).collect();
        model.load_state(&state)?;
        Ok(model)
    }
}

/// Write `model` to `path`, creating parent directories and replacing any
/// existing file.
pub fn save_model(model: &Sequential, path: &Path) -> Result<()> {
    ModelArtifact::from_model(model).write(path)?;
    log::info!("wrote model artifact {}", path.display());
    Ok(())
}

pub fn load_model(path: &Path) -> Result<Sequential> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
    let model = artifact.into_model()?;
    log::info!("loaded model artifact {}", path.display());
    Ok(model)
}
