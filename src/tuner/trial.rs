use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::hyperparameters::HyperParameters;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    Running,
    Completed,
    /// Finished without producing a finite objective value
    Invalid,
}

/// One evaluated hyperparameter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub trial_id: String,
    pub hyperparameters: HyperParameters,
    pub score: Option<f64>,
    /// Zero-based epoch at which `score` was reached
    pub best_step: Option<usize>,
    pub status: TrialStatus,
}

impl Trial {
    pub fn new(index: usize, hyperparameters: HyperParameters) -> Self {
        Trial {
            trial_id: format!("{index:02}"),
            hyperparameters,
            score: None,
            best_step: None,
            status: TrialStatus::Running,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed && self.score.is_some()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Trial> {
        let json = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(serde_json::from_str(&json)?)
    }
}
