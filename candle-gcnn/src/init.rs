//! Parameter initialization, regularization and constraints.
//!
//! These are stored in the layer configuration, hence the serde support, and are converted to
//! the candle-nn equivalents when the variables get created.
use candle::{Result, Tensor};
use serde::{Deserialize, Serialize};

/// Fuzz factor used in norm based constraints.
const CONSTRAINT_EPSILON: f64 = 1e-7;

/// Variable initializations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
pub enum Initializer {
    Zeros,
    Ones,
    /// Constant value.
    Constant(f64),
    /// Random normal with some mean and standard deviation.
    RandomNormal { mean: f64, stddev: f64 },
    /// Uniform initialization between some lower and upper bounds.
    RandomUniform { minval: f64, maxval: f64 },
}

impl From<Initializer> for candle_nn::Init {
    fn from(init: Initializer) -> Self {
        match init {
            Initializer::Zeros => Self::Const(0.),
            Initializer::Ones => Self::Const(1.),
            Initializer::Constant(v) => Self::Const(v),
            Initializer::RandomNormal { mean, stddev } => Self::Randn {
                mean,
                stdev: stddev,
            },
            Initializer::RandomUniform { minval, maxval } => Self::Uniform {
                lo: minval,
                up: maxval,
            },
        }
    }
}

/// Weight penalties added to the training loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
pub enum Regularizer {
    L1 { l1: f64 },
    L2 { l2: f64 },
    L1L2 { l1: f64, l2: f64 },
}

impl Regularizer {
    /// Returns a scalar tensor holding the penalty for `w`.
    pub fn penalty(&self, w: &Tensor) -> Result<Tensor> {
        let (l1, l2) = match *self {
            Self::L1 { l1 } => (l1, 0.),
            Self::L2 { l2 } => (0., l2),
            Self::L1L2 { l1, l2 } => (l1, l2),
        };
        let mut penalty = Tensor::zeros((), w.dtype(), w.device())?;
        if l1 != 0. {
            penalty = (penalty + (w.abs()?.sum_all()? * l1)?)?;
        }
        if l2 != 0. {
            penalty = (penalty + (w.sqr()?.sum_all()? * l2)?)?;
        }
        Ok(penalty)
    }
}

/// Projections applied to a variable after each optimizer step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
pub enum Constraint {
    NonNeg,
    MaxNorm { max_value: f64 },
    UnitNorm,
}

impl Constraint {
    pub fn project(&self, w: &Tensor) -> Result<Tensor> {
        match *self {
            Self::NonNeg => w.relu(),
            Self::MaxNorm { max_value } => {
                let norm = w.sqr()?.sum_all()?.sqrt()?;
                let desired = norm.clamp(0f64, max_value)?;
                let scale = (desired / (norm + CONSTRAINT_EPSILON)?)?;
                w.broadcast_mul(&scale)
            }
            Self::UnitNorm => {
                let norm = w.sqr()?.sum_all()?.sqrt()?;
                w.broadcast_div(&(norm + CONSTRAINT_EPSILON)?)
            }
        }
    }
}
