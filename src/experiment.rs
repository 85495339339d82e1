//! End-to-end experiment: search, retrain the winner, evaluate, persist.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::callbacks::{Callback, EarlyStopping, ModelCheckpoint, Mode, ValidationMetrics};
use crate::config::RunConfig;
use crate::data;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::hypermodel::DenseHyperModel;
use crate::model::FitOptions;
use crate::tuner::{BayesianOracle, BayesianTuner, HyperModel, HyperParameters};

/// Metric the final fit checkpoints on
const CHECKPOINT_METRIC: &str = "val_f1";

/// Where one run writes its artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct RunLayout {
    pub target: String,
    /// Parent of the tuner project directory
    pub tuner_dir: PathBuf,
    pub project_name: String,
    pub models_dir: PathBuf,
    pub best_f1_dir: PathBuf,
    pub history_dir: PathBuf,
}

impl RunLayout {
    pub fn new(root: &Path, target: &str, timestamp: &str) -> Self {
        RunLayout {
            target: target.to_string(),
            tuner_dir: root
                .join("tuner_dir")
                .join(format!("{target}_tuner_dir_{timestamp}")),
            project_name: format!("{target}_single_dnn_tuner_{timestamp}"),
            models_dir: root
                .join("tuner_models")
                .join(format!("{target}_tuner_models_{timestamp}")),
            best_f1_dir: root.join(format!("{target}_best_f1_{timestamp}")),
            history_dir: root.join(format!("{target}_best_fit_histories_{timestamp}")),
        }
    }

    /// Creates the run directories. Returns `false`, creating nothing else, when
    /// another run already owns this tuner directory.
    pub fn create(&self) -> Result<bool> {
        if let Some(parent) = self.tuner_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        match fs::create_dir(&self.tuner_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(Error::io(&self.tuner_dir, e)),
        }
        for dir in [&self.models_dir, &self.best_f1_dir, &self.history_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }
        Ok(true)
    }

    /// Creates a layout no other run uses, suffixing `_1`, `_2`, ... to a taken timestamp
    pub fn claim(root: &Path, target: &str, timestamp: &str) -> Result<Self> {
        let mut layout = RunLayout::new(root, target, timestamp);
        let mut n = 0;
        while !layout.create()? {
            n += 1;
            layout = RunLayout::new(root, target, &format!("{timestamp}_{n}"));
        }
        Ok(layout)
    }

    pub fn best_model_path(&self) -> PathBuf {
        self.models_dir.join(format!("{}_best_dnn.json", self.target))
    }

    pub fn best_hyperparameters_path(&self) -> PathBuf {
        self.models_dir.join(format!("{}_best_dnn_hp.json", self.target))
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.models_dir.join(format!("{}_scaler.json", self.target))
    }

    /// Filename template for [`ModelCheckpoint`]
    pub fn checkpoint_template(&self) -> String {
        self.best_f1_dir
            .join(format!(
                "{}_f1_weight_epoch{{epoch}}-valacc{{val_accuracy}}-valf1{{val_f1}}.json",
                self.target
            ))
            .to_string_lossy()
            .into_owned()
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_dir.join(format!("{}.json", self.target))
    }
}

/// Contents of the history JSON written at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Whole seconds from start to finish
    pub time_consuming: u64,
    /// Per-epoch metrics of the final fit, rendered as a mapping
    pub history: String,
    pub test_loss: f64,
    pub test_accuracy: f64,
}

impl RunRecord {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    pub fn load(path: &Path) -> Result<RunRecord> {
        let json = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub layout: RunLayout,
    pub best_hyperparameters: HyperParameters,
    /// Last checkpoint written by the final fit
    pub best_checkpoint: Option<PathBuf>,
    pub record: RunRecord,
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|e| Error::io(path, e))
}

pub fn run(config: &RunConfig) -> Result<RunSummary> {
    let started = Instant::now();
    config.validate()?;
    let target = config.data.target.as_str();
    info!(target, "starting run");

    let device = Device::open(&config.device)?;
    info!(device = %device.describe(), "device selected");

    let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();
    let layout = RunLayout::claim(&config.output.root, target, &timestamp)?;

    let data = data::prepare(&config.data)?;
    let class_weight = data.class_weights();
    info!(?class_weight, "balanced class weights");

    let seed = config.data.seed;
    let hypermodel = DenseHyperModel::new(data.num_features(), data.num_classes(), config.space.clone(), seed);
    let oracle = BayesianOracle::new(
        config.search.objective(),
        config.search.max_trials,
        config.search.oracle.clone(),
        seed,
    );
    let mut tuner = BayesianTuner::new(
        hypermodel.clone(),
        oracle,
        &layout.tuner_dir,
        &layout.project_name,
        device.clone(),
    )?
    .early_stopping(config.search.early_stopping_patience);

    let search_options = FitOptions {
        epochs: config.search.epochs,
        batch_size: config.search.batch_size,
        class_weight: Some(class_weight),
        shuffle: true,
        verbose: config.search.verbose,
        seed,
    };
    let mut metrics = ValidationMetrics::new(data.x_valid.clone(), data.y_valid.clone())?;
    if !config.search.verbose {
        metrics = metrics.quiet();
    }

    let search_started = Instant::now();
    let mut search_callbacks: [&mut dyn Callback; 1] = [&mut metrics];
    tuner.search(
        &data.x_train,
        &data.y_train,
        (&data.x_valid, &data.y_valid),
        &search_options,
        &mut search_callbacks,
    )?;
    info!(
        seconds = search_started.elapsed().as_secs(),
        trials = tuner.oracle().trials().len(),
        "search finished"
    );
    tracing::debug!("{}", tuner.results_summary(config.search.max_trials));

    let (best_model, best_hp) = tuner.best_model()?;
    best_model.save(layout.best_model_path())?;
    write_json(&layout.best_hyperparameters_path(), best_hp.values())?;
    if config.output.save_scaler {
        write_json(&layout.scaler_path(), &data.scaler)?;
    }
    info!(
        values = ?best_hp.values(),
        model = %layout.best_model_path().display(),
        "best model saved"
    );

    let mut model = if config.final_fit.warm_start {
        best_model
    } else {
        let mut hp = best_hp.clone();
        let mut fresh = hypermodel.build(&mut hp)?;
        fresh.set_device(device.clone());
        fresh
    };

    let mut checkpoint =
        ModelCheckpoint::new(layout.checkpoint_template(), CHECKPOINT_METRIC, Mode::Max).verbose(config.search.verbose);
    let mut early_stopping = config
        .final_fit
        .early_stopping_patience
        .map(|patience| EarlyStopping::new(CHECKPOINT_METRIC, Mode::Max, patience));
    let final_options = FitOptions {
        epochs: config.final_fit.epochs.unwrap_or(config.search.epochs),
        ..search_options
    };

    let mut callbacks: Vec<&mut dyn Callback> = Vec::new();
    callbacks.push(&mut metrics);
    callbacks.push(&mut checkpoint);
    if let Some(es) = early_stopping.as_mut() {
        callbacks.push(es);
    }
    let history = model.fit(
        &data.x_train,
        &data.y_train,
        Some((&data.x_valid, &data.y_valid)),
        &final_options,
        &mut callbacks,
    )?;
    drop(callbacks);

    let evaluation = model.evaluate(&data.x_test, &data.y_test)?;
    println!("{target}_test_result:");
    println!(
        "test_loss: {:.4}, test_accuracy: {:.4}",
        evaluation.loss, evaluation.accuracy
    );

    let record = RunRecord {
        time_consuming: started.elapsed().as_secs(),
        history: history.to_string(),
        test_loss: evaluation.loss,
        test_accuracy: evaluation.accuracy,
    };
    record.save(&layout.history_path())?;
    info!(
        seconds = record.time_consuming,
        test_loss = record.test_loss,
        test_accuracy = record.test_accuracy,
        history = %layout.history_path().display(),
        "run finished"
    );

    Ok(RunSummary {
        best_checkpoint: checkpoint.last_saved().map(Path::to_path_buf),
        layout,
        best_hyperparameters: best_hp,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = RunLayout::new(Path::new("out"), "dloc", "20200415181300");
        assert_eq!(
            layout.tuner_dir,
            PathBuf::from("out/tuner_dir/dloc_tuner_dir_20200415181300")
        );
        assert_eq!(layout.project_name, "dloc_single_dnn_tuner_20200415181300");
        assert_eq!(
            layout.best_model_path(),
            PathBuf::from("out/tuner_models/dloc_tuner_models_20200415181300/dloc_best_dnn.json")
        );
        assert_eq!(
            layout.history_path(),
            PathBuf::from("out/dloc_best_fit_histories_20200415181300/dloc.json")
        );
        assert!(layout
            .checkpoint_template()
            .ends_with("dloc_f1_weight_epoch{epoch}-valacc{val_accuracy}-valf1{val_f1}.json"));
    }

    #[test]
    fn test_same_second_runs_get_separate_projects() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLayout::claim(dir.path(), "dloc", "20200415181300").unwrap();
        let second = RunLayout::claim(dir.path(), "dloc", "20200415181300").unwrap();

        assert_ne!(first.tuner_dir, second.tuner_dir);
        assert_eq!(second.project_name, "dloc_single_dnn_tuner_20200415181300_1");
        assert!(second.tuner_dir.ends_with("dloc_tuner_dir_20200415181300_1"));
        assert!(second.models_dir.is_dir());
        assert!(second.best_f1_dir.is_dir());
        assert!(second.history_dir.is_dir());
        assert!(!first.tuner_dir.join(&first.project_name).exists());
    }

    #[test]
    fn test_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dloc.json");
        let record = RunRecord {
            time_consuming: 12,
            history: "{'loss': [0.5]}".to_string(),
            test_loss: 0.25,
            test_accuracy: 0.9,
        };
        record.save(&path).unwrap();
        assert_eq!(RunRecord::load(&path).unwrap(), record);

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["time_consuming"].is_u64());
        assert!(raw["test_loss"].is_f64());
    }
}
