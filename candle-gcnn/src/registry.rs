//! Serialized layer configurations.
//!
//! Layers are saved as `{"class_name": ..., "config": {...}}`, the class name being the stable
//! name under which the layer gets reconstructed. The weights themselves are saved separately,
//! e.g. with [`candle_nn::VarMap::save`].
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::{GBatchNorm, GBatchNormConfig, Result};

pub const GBATCH_NORM: &str = "GBatchNorm";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
pub enum LayerConfig {
    #[serde(rename = "GBatchNorm")]
    GBatchNorm(GBatchNormConfig),
}

impl LayerConfig {
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::GBatchNorm(_) => GBATCH_NORM,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Rebuilds the layer, the variables are looked up in `vb` under their usual names.
    pub fn build(self, input_shape: &[Option<usize>], vb: VarBuilder) -> Result<GBatchNorm> {
        match self {
            Self::GBatchNorm(config) => GBatchNorm::build(config, input_shape, vb),
        }
    }
}

impl From<&GBatchNorm> for LayerConfig {
    fn from(layer: &GBatchNorm) -> Self {
        Self::GBatchNorm(layer.config().clone())
    }
}
