//! Checkpoint callback that writes the model whenever a monitored metric improves

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{monitored, Callback, CallbackAction, Mode};
use crate::error::{Error, Result};
use crate::history::Logs;
use crate::model::Model;

/// Saves the model to a path built from a template.
///
/// `{epoch}` expands to the one-based epoch number padded to two digits and
/// `{name}` to the value of metric `name` with four decimals, so
/// `w-epoch{epoch}-valf1{val_f1}.json` becomes `w-epoch03-valf10.8123.json`.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    template: String,
    monitor: String,
    mode: Mode,
    save_best_only: bool,
    verbose: bool,
    best: f64,
    best_epoch: Option<usize>,
    last_saved: Option<PathBuf>,
}

impl ModelCheckpoint {
    pub fn new(template: impl Into<String>, monitor: impl Into<String>, mode: Mode) -> Self {
        ModelCheckpoint {
            template: template.into(),
            monitor: monitor.into(),
            mode,
            save_best_only: true,
            verbose: false,
            best: mode.worst(),
            best_epoch: None,
            last_saved: None,
        }
    }

    pub fn save_best_only(mut self, save_best_only: bool) -> Self {
        self.save_best_only = save_best_only;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Best monitored value and its zero-based epoch
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best_epoch.map(|epoch| (epoch, self.best))
    }

    pub fn last_saved(&self) -> Option<&Path> {
        self.last_saved.as_deref()
    }

    /// Expands the placeholders of the template's file name; its directories are kept as written
    pub fn format_path(&self, epoch: usize, logs: &Logs) -> Result<PathBuf> {
        let template = Path::new(&self.template);
        let name = template
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Config(format!("checkpoint template {} has no file name", self.template)))?;

        let mut out = String::with_capacity(name.len() + 16);
        let mut rest = name;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| Error::Config(format!("unclosed placeholder in {}", self.template)))?;
            let key = &after[..close];
            if key == "epoch" {
                out.push_str(&format!("{:02}", epoch + 1));
            } else {
                out.push_str(&format!("{:.4}", monitored(logs, key)?));
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(template.with_file_name(out))
    }
}

impl Callback for ModelCheckpoint {
    fn on_epoch_end(&mut self, epoch: usize, model: &Model, logs: &mut Logs) -> Result<CallbackAction> {
        let value = monitored(logs, &self.monitor)?;
        let improved = self.mode.improved(value, self.best, 0.0);

        if improved {
            let path = self.format_path(epoch, logs)?;
            if self.verbose {
                println!(
                    "\nEpoch {:05}: {} improved from {:.5} to {:.5}, saving model to {}",
                    epoch + 1,
                    self.monitor,
                    self.best,
                    value,
                    path.display()
                );
            }
            self.best = value;
            self.best_epoch = Some(epoch);
            model.save(&path)?;
            debug!(epoch = epoch + 1, monitor = %self.monitor, value, path = %path.display(), "checkpoint saved");
            self.last_saved = Some(path);
        } else if !self.save_best_only {
            let path = self.format_path(epoch, logs)?;
            model.save(&path)?;
            self.last_saved = Some(path);
        } else if self.verbose {
            println!(
                "\nEpoch {:05}: {} did not improve from {:.5}",
                epoch + 1,
                self.monitor,
                self.best
            );
        }

        Ok(CallbackAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_path() {
        let ckpt = ModelCheckpoint::new(
            "dloc_f1_weight_epoch{epoch}-valacc{val_accuracy}-valf1{val_f1}.json",
            "val_f1",
            Mode::Max,
        );
        let mut logs = Logs::new();
        logs.insert("val_accuracy".to_string(), 0.91234);
        logs.insert("val_f1".to_string(), 0.5);
        let path = ckpt.format_path(2, &logs).unwrap();
        assert_eq!(
            path,
            PathBuf::from("dloc_f1_weight_epoch03-valacc0.9123-valf10.5000.json")
        );
    }

    #[test]
    fn test_format_path_missing_metric() {
        let ckpt = ModelCheckpoint::new("w{val_f1}.json", "val_f1", Mode::Max);
        let err = ckpt.format_path(0, &Logs::new()).unwrap_err();
        assert!(matches!(err, Error::MissingMetric(name) if name == "val_f1"));
    }

    #[test]
    fn test_braces_in_directories_are_literal() {
        let ckpt = ModelCheckpoint::new(
            "runs/{2024}/best_f1_{x/dloc_epoch{epoch}-valf1{val_f1}.json",
            "val_f1",
            Mode::Max,
        );
        let mut logs = Logs::new();
        logs.insert("val_f1".to_string(), 0.25);
        let path = ckpt.format_path(0, &logs).unwrap();
        assert_eq!(
            path,
            PathBuf::from("runs/{2024}/best_f1_{x/dloc_epoch01-valf10.2500.json")
        );
    }

    #[test]
    fn test_plain_path_has_no_placeholders() {
        let ckpt = ModelCheckpoint::new("checkpoint.json", "val_f1", Mode::Max);
        let path = ckpt.format_path(9, &Logs::new()).unwrap();
        assert_eq!(path, PathBuf::from("checkpoint.json"));
        assert!(ckpt.best().is_none());
    }
}
