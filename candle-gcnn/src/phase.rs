//! Training versus inference mode.
//!
//! Every call receives an explicit [`LearningPhase`]. `LearningPhase::Ambient` defers to the
//! [`ExecutionContext`] injected by the caller, which may hold a runtime [`PhaseSwitch`] when the
//! mode is only known once the computation is executed.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LearningPhase {
    Training,
    Inference,
    #[default]
    Ambient,
}

impl From<bool> for LearningPhase {
    fn from(training: bool) -> Self {
        if training {
            Self::Training
        } else {
            Self::Inference
        }
    }
}

impl From<Option<bool>> for LearningPhase {
    fn from(training: Option<bool>) -> Self {
        training.map_or(Self::Ambient, Self::from)
    }
}

impl From<i32> for LearningPhase {
    fn from(training: i32) -> Self {
        Self::from(training != 0)
    }
}

impl From<i64> for LearningPhase {
    fn from(training: i64) -> Self {
        Self::from(training != 0)
    }
}

/// A training flag shared between the code building a step and the code running it.
#[derive(Debug, Clone, Default)]
pub struct PhaseSwitch(Arc<AtomicBool>);

impl PhaseSwitch {
    pub fn new(training: bool) -> Self {
        Self(Arc::new(AtomicBool::new(training)))
    }

    pub fn set(&self, training: bool) {
        self.0.store(training, Ordering::SeqCst)
    }

    pub fn is_training(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum TrainingFlag {
    /// Known when the call is made.
    Static(bool),
    /// Read from the switch when the output is resolved.
    Dynamic(PhaseSwitch),
}

impl TrainingFlag {
    pub fn as_static(&self) -> Option<bool> {
        match self {
            Self::Static(b) => Some(*b),
            Self::Dynamic(_) => None,
        }
    }
}

/// Execution state that `LearningPhase::Ambient` resolves against.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    learning_phase: TrainingFlag,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::inference()
    }
}

impl ExecutionContext {
    pub fn new(learning_phase: TrainingFlag) -> Self {
        Self { learning_phase }
    }

    pub fn training() -> Self {
        Self::new(TrainingFlag::Static(true))
    }

    pub fn inference() -> Self {
        Self::new(TrainingFlag::Static(false))
    }

    pub fn dynamic(switch: PhaseSwitch) -> Self {
        Self::new(TrainingFlag::Dynamic(switch))
    }

    pub fn learning_phase(&self) -> &TrainingFlag {
        &self.learning_phase
    }

    /// Effective training flag for a call, a layer that is not trainable always runs in
    /// inference mode.
    pub fn resolve(&self, phase: LearningPhase, trainable: bool) -> TrainingFlag {
        if !trainable {
            return TrainingFlag::Static(false);
        }
        match phase {
            LearningPhase::Training => TrainingFlag::Static(true),
            LearningPhase::Inference => TrainingFlag::Static(false),
            LearningPhase::Ambient => self.learning_phase.clone(),
        }
    }
}
