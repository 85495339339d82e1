//! Run configuration, read from YAML. Every field has a default, so an
//! empty file (or no file) reproduces the stock `dloc` experiment.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::callbacks::Mode;
use crate::device::DeviceConfig;
use crate::error::{Error, Result};
use crate::hypermodel::SearchSpace;
use crate::tuner::{Objective, OracleSettings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub data: DataConfig,
    pub search: SearchConfig,
    pub space: SearchSpace,
    pub device: DeviceConfig,
    pub output: OutputConfig,
    pub final_fit: FinalFitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    /// Name of the target column
    pub target: String,
    /// Leading columns used as features
    pub feature_count: usize,
    /// Training rows held out for validation
    pub validation_size: usize,
    /// Seeds the split, weight initialization, dropout and the oracle
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            train_path: PathBuf::from("../../../dataset/train.csv"),
            test_path: PathBuf::from("../../../dataset/test.csv"),
            target: "dloc".to_string(),
            feature_count: 11,
            validation_size: 2700,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_trials: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub objective: String,
    pub direction: Mode,
    /// Stop a trial after this many epochs without improvement, `None` runs every epoch
    pub early_stopping_patience: Option<usize>,
    pub verbose: bool,
    #[serde(flatten)]
    pub oracle: OracleSettings,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_trials: 15,
            epochs: 25000,
            batch_size: 1024,
            objective: "val_f1".to_string(),
            direction: Mode::Max,
            early_stopping_patience: None,
            verbose: true,
            oracle: OracleSettings::default(),
        }
    }
}

impl SearchConfig {
    pub fn objective(&self) -> Objective {
        Objective::new(self.objective.clone(), self.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory the timestamped run folders are created in
    pub root: PathBuf,
    /// Also write the fitted feature scaler next to the best model
    pub save_scaler: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            root: PathBuf::from("."),
            save_scaler: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalFitConfig {
    /// Continue from the best trial's weights instead of a fresh build
    pub warm_start: bool,
    /// Epoch cap for the final fit, defaults to the search cap
    pub epochs: Option<usize>,
    pub early_stopping_patience: Option<usize>,
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<RunConfig> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        if text.trim().is_empty() {
            return Ok(RunConfig::default());
        }
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.target.is_empty() {
            return Err(Error::Config("target column name is empty".to_string()));
        }
        if self.data.feature_count == 0 {
            return Err(Error::Config("feature_count must be at least 1".to_string()));
        }
        if self.data.validation_size == 0 {
            return Err(Error::Config("validation_size must be at least 1".to_string()));
        }
        let search = &self.search;
        if search.max_trials == 0 || search.epochs == 0 || search.batch_size == 0 {
            return Err(Error::Config(
                "max_trials, epochs and batch_size must be positive".to_string(),
            ));
        }
        if search.objective.is_empty() {
            return Err(Error::Config("objective metric name is empty".to_string()));
        }
        if search.oracle.num_candidates == 0 || !(search.oracle.length_scale > 0.0) {
            return Err(Error::Config(
                "oracle needs candidates and a positive length scale".to_string(),
            ));
        }
        if self.final_fit.epochs == Some(0) {
            return Err(Error::Config("final_fit.epochs must be positive".to_string()));
        }
        if self.device.memory_limit_mb == 0 {
            return Err(Error::Config("memory_limit_mb must be positive".to_string()));
        }
        self.space.validate()
    }
}
