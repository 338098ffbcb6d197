//! Group-tied Batch Normalization.
//!
//! This layer applies Batch Normalization to the output of a group-convolution. The channels of
//! such a feature map come in orbits of `group.order()` consecutive channels and all the channels
//! of an orbit share their scale, shift and running statistics, which keeps the network
//! equivariant. The channel dimension has to be the last one.
//!
//! In training mode the running statistics are not modified by the forward pass: the call
//! returns the [`StatisticUpdate`]s alongside the output and the training loop applies them with
//! [`GBatchNorm::apply_updates`]. [`candle::ModuleT`] is also implemented and applies the updates
//! straight away.
use candle::{DType, Tensor, TensorId, Var};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::init::{Constraint, Initializer, Regularizer};
use crate::phase::{ExecutionContext, LearningPhase, PhaseSwitch, TrainingFlag};
use crate::{ops, orbit, Error, Group, Result};

fn default_axis() -> isize {
    -1
}

fn default_momentum() -> f64 {
    0.99
}

fn default_epsilon() -> f64 {
    1e-3
}

fn default_true() -> bool {
    true
}

fn default_zeros() -> Initializer {
    Initializer::Zeros
}

fn default_ones() -> Initializer {
    Initializer::Ones
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GBatchNormConfig {
    #[serde(rename = "h")]
    pub group: Group,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub trainable: bool,
    /// Only `-1` is supported.
    #[serde(default = "default_axis")]
    pub axis: isize,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Whether to add the learned shift `beta`, when false `beta` stays frozen at its initial
    /// value.
    #[serde(default = "default_true")]
    pub center: bool,
    /// Whether to multiply by the learned scale `gamma`, when false `gamma` stays frozen at its
    /// initial value.
    #[serde(default = "default_true")]
    pub scale: bool,
    #[serde(default = "default_zeros")]
    pub beta_initializer: Initializer,
    #[serde(default = "default_ones")]
    pub gamma_initializer: Initializer,
    #[serde(default = "default_zeros")]
    pub moving_mean_initializer: Initializer,
    #[serde(default = "default_ones")]
    pub moving_variance_initializer: Initializer,
    #[serde(default)]
    pub beta_regularizer: Option<Regularizer>,
    #[serde(default)]
    pub gamma_regularizer: Option<Regularizer>,
    #[serde(default)]
    pub beta_constraint: Option<Constraint>,
    #[serde(default)]
    pub gamma_constraint: Option<Constraint>,
}

impl GBatchNormConfig {
    pub fn new(group: Group) -> Self {
        Self {
            group,
            name: None,
            trainable: true,
            axis: default_axis(),
            momentum: default_momentum(),
            epsilon: default_epsilon(),
            center: true,
            scale: true,
            beta_initializer: Initializer::Zeros,
            gamma_initializer: Initializer::Ones,
            moving_mean_initializer: Initializer::Zeros,
            moving_variance_initializer: Initializer::Ones,
            beta_regularizer: None,
            gamma_regularizer: None,
            beta_constraint: None,
            gamma_constraint: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.axis != -1 {
            return Err(Error::UnsupportedAxis { axis: self.axis });
        }
        // 0 keeps only the latest batch statistics, 1 freezes them.
        if !(0.0..=1.0).contains(&self.momentum) {
            return Err(Error::InvalidConfig(format!(
                "momentum should be in [0, 1], got {}",
                self.momentum
            )));
        }
        if self.epsilon.is_nan() || self.epsilon < 0. {
            return Err(Error::InvalidConfig(format!(
                "epsilon cannot be negative, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

impl From<Group> for GBatchNormConfig {
    fn from(group: Group) -> Self {
        Self::new(group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningStatistic {
    Mean,
    Variance,
}

/// A pending exponential moving average update of one of the running statistics.
#[derive(Debug, Clone)]
pub struct StatisticUpdate {
    input: TensorId,
    target: TensorId,
    statistic: RunningStatistic,
    value: Tensor,
    momentum: f64,
}

impl StatisticUpdate {
    /// Id of the input tensor whose batch statistics produced this update.
    pub fn input(&self) -> TensorId {
        self.input
    }

    /// Id of the running statistic variable this update blends into.
    pub fn target(&self) -> TensorId {
        self.target
    }

    pub fn statistic(&self) -> RunningStatistic {
        self.statistic
    }

    /// The per-orbit batch statistic, shape `(num_orbits,)`.
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }
}

#[derive(Debug, Clone)]
pub enum PhaseOutput {
    Static(Tensor),
    /// Both branches are computed, the switch selects one of them on resolution.
    Deferred {
        training: Tensor,
        inference: Tensor,
        switch: PhaseSwitch,
    },
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub output: PhaseOutput,
    pub updates: Vec<StatisticUpdate>,
}

impl Normalized {
    /// Selects the output for the current phase, the updates are dropped when the inference
    /// branch gets selected.
    pub fn resolve(self) -> (Tensor, Vec<StatisticUpdate>) {
        match self.output {
            PhaseOutput::Static(ys) => (ys, self.updates),
            PhaseOutput::Deferred {
                training,
                inference,
                switch,
            } => {
                if switch.is_training() {
                    (training, self.updates)
                } else {
                    (inference, vec![])
                }
            }
        }
    }
}

// Per-channel views of the per-orbit parameters, recomputed on each call.
struct Expanded {
    gamma: Tensor,
    beta: Tensor,
    moving_mean: Tensor,
    moving_variance: Tensor,
}

#[derive(Debug, Clone)]
pub struct GBatchNorm {
    config: GBatchNormConfig,
    gamma: Var,
    beta: Var,
    moving_mean: Var,
    moving_variance: Var,
    num_channels: usize,
    input_rank: Option<usize>,
    span: tracing::Span,
}

impl GBatchNorm {
    /// Creates the layer for inputs of shape `input_shape`, only the last dimension has to be
    /// known.
    pub fn build(
        config: GBatchNormConfig,
        input_shape: &[Option<usize>],
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let num_channels = match input_shape.last() {
            Some(Some(num_channels)) => *num_channels,
            _ => {
                return Err(Error::UndefinedChannelDim {
                    shape: input_shape.to_vec(),
                })
            }
        };
        Self::new(config, num_channels, Some(input_shape.len()), vb)
    }

    fn new(
        config: GBatchNormConfig,
        num_channels: usize,
        input_rank: Option<usize>,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let num_orbits = orbit::num_orbits(num_channels, config.group)?;
        let var = |name: &str, init: Initializer| -> Result<Var> {
            let t = vb.get_with_hints(num_orbits, name, init.into())?;
            Ok(Var::from_tensor(&t)?)
        };
        let gamma = var("gamma", config.gamma_initializer)?;
        let beta = var("beta", config.beta_initializer)?;
        let moving_mean = var("moving_mean", config.moving_mean_initializer)?;
        let moving_variance = var("moving_variance", config.moving_variance_initializer)?;
        tracing::debug!(
            group = %config.group,
            num_channels,
            num_orbits,
            "built group batch norm"
        );
        let span = tracing::span!(tracing::Level::TRACE, "gbatch-norm");
        Ok(Self {
            config,
            gamma,
            beta,
            moving_mean,
            moving_variance,
            num_channels,
            input_rank,
            span,
        })
    }

    pub fn config(&self) -> &GBatchNormConfig {
        &self.config
    }

    pub fn group(&self) -> Group {
        self.config.group
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_orbits(&self) -> usize {
        self.num_channels / self.config.group.order()
    }

    pub fn gamma(&self) -> &Tensor {
        self.gamma.as_tensor()
    }

    pub fn beta(&self) -> &Tensor {
        self.beta.as_tensor()
    }

    pub fn moving_mean(&self) -> &Tensor {
        self.moving_mean.as_tensor()
    }

    pub fn moving_variance(&self) -> &Tensor {
        self.moving_variance.as_tensor()
    }

    pub fn trainable(&self) -> bool {
        self.config.trainable
    }

    /// Freezing the layer also switches it to inference mode.
    pub fn set_trainable(&mut self, trainable: bool) {
        self.config.trainable = trainable
    }

    /// The variables to hand over to an optimizer.
    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = vec![];
        if self.config.trainable && self.config.scale {
            vars.push(self.gamma.clone())
        }
        if self.config.trainable && self.config.center {
            vars.push(self.beta.clone())
        }
        vars
    }

    pub fn non_trainable_vars(&self) -> Vec<Var> {
        let mut vars = vec![];
        if !(self.config.trainable && self.config.scale) {
            vars.push(self.gamma.clone())
        }
        if !(self.config.trainable && self.config.center) {
            vars.push(self.beta.clone())
        }
        vars.push(self.moving_mean.clone());
        vars.push(self.moving_variance.clone());
        vars
    }

    fn check_input(&self, xs: &Tensor) -> Result<()> {
        let rank = xs.rank();
        let rank_ok = rank >= 2 && self.input_rank.map_or(true, |r| r == rank);
        if !rank_ok || xs.dims()[rank - 1] != self.num_channels {
            return Err(Error::InputSpec {
                shape: xs.shape().clone(),
                rank: self.input_rank,
                num_channels: self.num_channels,
            });
        }
        Ok(())
    }

    fn expand(&self, dtype: DType) -> Result<Expanded> {
        let group = self.config.group;
        let param = |v: &Var, trainable: bool| -> Result<Tensor> {
            let t = if trainable && self.config.trainable {
                v.as_tensor().clone()
            } else {
                v.as_tensor().detach()
            };
            orbit::expand(&t.to_dtype(dtype)?, group)
        };
        Ok(Expanded {
            gamma: param(&self.gamma, self.config.scale)?,
            beta: param(&self.beta, self.config.center)?,
            moving_mean: param(&self.moving_mean, false)?,
            moving_variance: param(&self.moving_variance, false)?,
        })
    }

    fn normalize_inference(
        &self,
        xs: &Tensor,
        p: &Expanded,
        reduction_axes: &[usize],
    ) -> Result<Tensor> {
        let rank = xs.rank();
        let needs_broadcasting = !reduction_axes.iter().copied().eq(0..rank - 1);
        let ys = if needs_broadcasting {
            let mut shape = vec![1; rank];
            shape[rank - 1] = self.num_channels;
            let b = |t: &Tensor| t.reshape(shape.as_slice());
            ops::batch_normalization(
                xs,
                &b(&p.moving_mean)?,
                &b(&p.moving_variance)?,
                &b(&p.beta)?,
                &b(&p.gamma)?,
                self.config.epsilon,
            )?
        } else {
            ops::batch_normalization(
                xs,
                &p.moving_mean,
                &p.moving_variance,
                &p.beta,
                &p.gamma,
                self.config.epsilon,
            )?
        };
        Ok(ys)
    }

    /// Normalizes `xs`, a tensor whose last dimension holds the channels.
    ///
    /// In training mode the output is computed with the batch statistics and the returned
    /// updates hold the per-orbit reduction of these statistics. When the phase is only known
    /// at execution time, both the training and inference outputs are computed and
    /// [`Normalized::resolve`] picks one.
    pub fn normalize(
        &self,
        xs: &Tensor,
        phase: LearningPhase,
        ctx: &ExecutionContext,
    ) -> Result<Normalized> {
        let _enter = self.span.enter();
        self.check_input(xs)?;
        let x_dtype = xs.dtype();
        let internal_dtype = match x_dtype {
            DType::F16 | DType::BF16 => DType::F32,
            d => d,
        };
        let xs_internal = xs.to_dtype(internal_dtype)?;
        let params = self.expand(internal_dtype)?;
        let reduction_axes: Vec<usize> = (0..xs.rank() - 1).collect();

        let flag = ctx.resolve(phase, self.config.trainable);
        if flag.as_static() == Some(false) {
            let ys = self.normalize_inference(&xs_internal, &params, &reduction_axes)?;
            return Ok(Normalized {
                output: PhaseOutput::Static(ys.to_dtype(x_dtype)?),
                updates: vec![],
            });
        }

        let sample_size: usize = reduction_axes.iter().map(|&a| xs.dims()[a]).product();
        let eps = self.config.epsilon;
        let (mean, variance) = ops::moments(&xs_internal, &reduction_axes)?;
        let normed = ops::batch_normalization(
            &xs_internal,
            &mean,
            &variance,
            &params.beta,
            &params.gamma,
            eps,
        )?
        .to_dtype(x_dtype)?;
        let variance = ops::unbiased_variance(&variance, sample_size, eps)?;

        let group = self.config.group;
        let mean = orbit::collapse(&mean.flatten_all()?, group)?;
        let variance = orbit::collapse(&variance.flatten_all()?, group)?;
        let update = |statistic, value: Tensor| StatisticUpdate {
            input: xs.id(),
            target: self.running(statistic).id(),
            statistic,
            value: value.detach(),
            momentum: self.config.momentum,
        };
        let updates = vec![
            update(RunningStatistic::Mean, mean),
            update(RunningStatistic::Variance, variance),
        ];

        let output = match flag {
            TrainingFlag::Static(_) => PhaseOutput::Static(normed),
            TrainingFlag::Dynamic(switch) => {
                let inference = self
                    .normalize_inference(&xs_internal, &params, &reduction_axes)?
                    .to_dtype(x_dtype)?;
                PhaseOutput::Deferred {
                    training: normed,
                    inference,
                    switch,
                }
            }
        };
        Ok(Normalized { output, updates })
    }

    fn running(&self, statistic: RunningStatistic) -> &Var {
        match statistic {
            RunningStatistic::Mean => &self.moving_mean,
            RunningStatistic::Variance => &self.moving_variance,
        }
    }

    /// Blends the updates into the running statistics, all the new values are computed before
    /// any variable gets modified. Updates have to come from a call on this layer, or on a layer
    /// sharing its variables.
    pub fn apply_updates(&self, updates: Vec<StatisticUpdate>) -> Result<()> {
        let num_orbits = self.num_orbits();
        let mut new_values = Vec::with_capacity(updates.len());
        for update in updates.iter() {
            let running = self.running(update.statistic);
            if update.value.dims() != [num_orbits] {
                return Err(Error::UpdateShape {
                    statistic: update.statistic,
                    expected: num_orbits,
                    got: update.value.shape().clone(),
                });
            }
            if update.target != running.id() {
                return Err(Error::ForeignUpdate {
                    statistic: update.statistic,
                });
            }
            let value = update.value.to_dtype(running.dtype())?;
            let blended = ops::moving_average_update(running.as_tensor(), &value, update.momentum)?;
            new_values.push((running, blended));
        }
        for (running, blended) in new_values {
            running.set(&blended)?;
        }
        tracing::debug!(num_updates = updates.len(), "applied running statistic updates");
        Ok(())
    }

    /// Sum of the regularization penalties of `gamma` and `beta`, `None` when no regularizer is
    /// set.
    pub fn regularization_loss(&self) -> Result<Option<Tensor>> {
        let mut loss: Option<Tensor> = None;
        for (regularizer, var) in [
            (self.config.gamma_regularizer, &self.gamma),
            (self.config.beta_regularizer, &self.beta),
        ] {
            if let Some(regularizer) = regularizer {
                let penalty = regularizer.penalty(var.as_tensor())?;
                loss = Some(match loss {
                    None => penalty,
                    Some(loss) => (loss + penalty)?,
                });
            }
        }
        Ok(loss)
    }

    /// Projects `gamma` and `beta` on their constraints, to be called after an optimizer step.
    pub fn apply_constraints(&self) -> Result<()> {
        for (constraint, var) in [
            (self.config.gamma_constraint, &self.gamma),
            (self.config.beta_constraint, &self.beta),
        ] {
            if let Some(constraint) = constraint {
                let projected = constraint.project(&var.as_tensor().detach())?;
                var.set(&projected)?;
            }
        }
        Ok(())
    }
}

impl candle::ModuleT for GBatchNorm {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle::Result<Tensor> {
        let ctx = ExecutionContext::default();
        let (ys, updates) = self.normalize(xs, train.into(), &ctx)?.resolve();
        self.apply_updates(updates)?;
        Ok(ys)
    }
}

/// Creates a [`GBatchNorm`] for inputs with `num_channels` channels in the last dimension.
pub fn gbatch_norm<C: Into<GBatchNormConfig>>(
    num_channels: usize,
    config: C,
    vb: VarBuilder,
) -> Result<GBatchNorm> {
    GBatchNorm::new(config.into(), num_channels, None, vb)
}
