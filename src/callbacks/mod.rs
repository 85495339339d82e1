//! Epoch-end hooks for `Model::fit`
//!
//! Callbacks run in registration order after the validation pass of each
//! epoch. They may add entries to the epoch logs; later callbacks and the
//! recorded history see those entries.

mod checkpoint;
mod early_stopping;
mod metrics;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::history::{History, Logs};
use crate::model::Model;

pub use checkpoint::ModelCheckpoint;
pub use early_stopping::EarlyStopping;
pub use metrics::{Labels, ValidationMetrics};

/// What the training loop should do after a callback returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Whether a monitored metric improves upwards or downwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Min,
    #[default]
    Max,
}

impl Mode {
    /// True when `value` beats `best` by more than `min_delta`
    pub fn improved(&self, value: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Mode::Min => value < best - min_delta,
            Mode::Max => value > best + min_delta,
        }
    }

    /// Starting point that any finite value improves on
    pub fn worst(&self) -> f64 {
        match self {
            Mode::Min => f64::INFINITY,
            Mode::Max => f64::NEG_INFINITY,
        }
    }
}

pub trait Callback {
    fn on_train_begin(&mut self, _model: &Model) -> Result<()> {
        Ok(())
    }

    /// `epoch` is zero-based
    fn on_epoch_end(&mut self, epoch: usize, model: &Model, logs: &mut Logs) -> Result<CallbackAction>;

    fn on_train_end(&mut self, _model: &Model, _history: &History) -> Result<()> {
        Ok(())
    }
}

/// Looks up a metric the callback depends on
pub(crate) fn monitored(logs: &Logs, name: &str) -> Result<f64> {
    logs.get(name)
        .copied()
        .ok_or_else(|| crate::error::Error::MissingMetric(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_improvement() {
        assert!(Mode::Max.improved(0.6, 0.5, 0.0));
        assert!(!Mode::Max.improved(0.5, 0.5, 0.0));
        assert!(!Mode::Max.improved(0.505, 0.5, 0.01));
        assert!(Mode::Min.improved(0.4, 0.5, 0.0));
        assert!(Mode::Max.improved(0.0, Mode::Max.worst(), 0.0));
        assert!(Mode::Min.improved(1e9, Mode::Min.worst(), 0.0));
    }
}
