//! Normalization layers for group-equivariant convolutional networks built with candle.
//!
//! A group-convolution over a symmetry group of order `n` produces feature maps whose channels
//! come in orbits of `n` consecutive channels. [`GBatchNorm`] normalizes these feature maps with
//! one scale, shift and pair of running statistics per orbit rather than per channel.
//!
//! ```rust
//! use candle::{DType, Device, Tensor};
//! use candle_gcnn::{gbatch_norm, ExecutionContext, Group, LearningPhase};
//! use candle_nn::{VarBuilder, VarMap};
//! # fn main() -> candle_gcnn::Result<()> {
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let bn = gbatch_norm(8, Group::Rotation4, vb)?;
//! assert_eq!(bn.moving_mean().dims(), &[2]);
//!
//! let xs = Tensor::randn(0f32, 1., (4, 3, 3, 8), &Device::Cpu)?;
//! let ctx = ExecutionContext::training();
//! let (ys, updates) = bn.normalize(&xs, LearningPhase::Ambient, &ctx)?.resolve();
//! assert_eq!(ys.dims(), xs.dims());
//! bn.apply_updates(updates)?;
//! # Ok(()) }
//! ```
pub mod batch_norm;
mod error;
pub mod group;
pub mod init;
pub mod ops;
pub mod orbit;
pub mod phase;
pub mod registry;

pub use batch_norm::{
    gbatch_norm, GBatchNorm, GBatchNormConfig, Normalized, PhaseOutput, RunningStatistic,
    StatisticUpdate,
};
pub use error::{Error, Result};
pub use group::Group;
pub use init::{Constraint, Initializer, Regularizer};
pub use phase::{ExecutionContext, LearningPhase, PhaseSwitch, TrainingFlag};
pub use registry::{LayerConfig, GBATCH_NORM};
