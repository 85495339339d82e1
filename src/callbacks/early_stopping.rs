use tracing::info;

use super::{monitored, Callback, CallbackAction, Mode};
use crate::error::Result;
use crate::history::Logs;
use crate::model::Model;

/// Stops training once the monitored metric has not improved for `patience` epochs
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    monitor: String,
    mode: Mode,
    patience: usize,
    min_delta: f64,
    best: f64,
    epochs_without_improvement: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(monitor: impl Into<String>, mode: Mode, patience: usize) -> Self {
        Self {
            monitor: monitor.into(),
            mode,
            patience,
            min_delta: 0.0,
            best: mode.worst(),
            epochs_without_improvement: 0,
            stopped_epoch: None,
        }
    }

    pub fn min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    pub fn reset(&mut self) {
        self.best = self.mode.worst();
        self.epochs_without_improvement = 0;
        self.stopped_epoch = None;
    }
}

impl Callback for EarlyStopping {
    fn on_train_begin(&mut self, _model: &Model) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn on_epoch_end(&mut self, epoch: usize, _model: &Model, logs: &mut Logs) -> Result<CallbackAction> {
        let value = monitored(logs, &self.monitor)?;
        if self.mode.improved(value, self.best, self.min_delta) {
            self.best = value;
            self.epochs_without_improvement = 0;
            return Ok(CallbackAction::Continue);
        }

        self.epochs_without_improvement += 1;
        if self.epochs_without_improvement >= self.patience {
            info!(epoch = epoch + 1, monitor = %self.monitor, best = self.best, "early stopping");
            self.stopped_epoch = Some(epoch);
            return Ok(CallbackAction::Stop);
        }
        Ok(CallbackAction::Continue)
    }
}
