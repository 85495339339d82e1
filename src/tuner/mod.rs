//! Hyperparameter search
//!
//! [`BayesianTuner`] asks its [`BayesianOracle`] for hyperparameter values,
//! builds a model from them through a [`HyperModel`], trains it, and
//! reports the best value of the objective back to the oracle. Every trial
//! keeps its best-epoch weights on disk under the project directory.

mod gaussian_process;
mod hyperparameters;
mod oracle;
mod trial;

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use gaussian_process::GaussianProcess;
pub use hyperparameters::{Domain, HyperParameter, HyperParameters, Value};
pub use oracle::{Acquisition, BayesianOracle, OracleSettings};
pub use trial::{Trial, TrialStatus};

use crate::callbacks::{Callback, EarlyStopping, ModelCheckpoint, Mode};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::model::{FitOptions, Model};

const ORACLE_FILE: &str = "oracle.json";
const TRIAL_FILE: &str = "trial.json";
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Builds a compiled model from hyperparameters, registering any it asks for
pub trait HyperModel {
    fn build(&self, hp: &mut HyperParameters) -> Result<Model>;
}

/// Metric the search optimizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub name: String,
    pub direction: Mode,
}

impl Objective {
    pub fn new(name: impl Into<String>, direction: Mode) -> Self {
        Objective {
            name: name.into(),
            direction,
        }
    }
}

pub struct BayesianTuner<H: HyperModel> {
    hypermodel: H,
    oracle: BayesianOracle,
    project_dir: PathBuf,
    device: Device,
    early_stopping_patience: Option<usize>,
}

impl<H: HyperModel> BayesianTuner<H> {
    /// Opens `directory/project_name`, resuming the search stored there if any
    pub fn new(
        hypermodel: H,
        mut oracle: BayesianOracle,
        directory: impl AsRef<Path>,
        project_name: &str,
        device: Device,
    ) -> Result<Self> {
        let project_dir = directory.as_ref().join(project_name);
        fs::create_dir_all(&project_dir).map_err(|e| Error::io(&project_dir, e))?;

        let oracle_path = project_dir.join(ORACLE_FILE);
        if oracle_path.exists() {
            oracle.restore(&oracle_path)?;
            info!(
                project = %project_dir.display(),
                finished = oracle.trials().len(),
                "resuming search"
            );
        }

        // one throwaway build registers the search space
        let mut hp = HyperParameters::new();
        hypermodel.build(&mut hp)?;
        oracle.register_space(&hp);

        Ok(BayesianTuner {
            hypermodel,
            oracle,
            project_dir,
            device,
            early_stopping_patience: None,
        })
    }

    /// Stop each trial once the objective has not improved for `patience` epochs
    pub fn early_stopping(mut self, patience: Option<usize>) -> Self {
        self.early_stopping_patience = patience;
        self
    }

    pub fn oracle(&self) -> &BayesianOracle {
        &self.oracle
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn trial_dir(&self, trial_id: &str) -> PathBuf {
        self.project_dir.join(format!("trial_{trial_id}"))
    }

    /// Runs trials until the oracle's budget is spent.
    ///
    /// `callbacks` run in every trial ahead of the tuner's own checkpoint,
    /// so metrics they add to the logs can serve as the objective.
    pub fn search(
        &mut self,
        x: &Array2<f32>,
        y: &[usize],
        validation: (&Array2<f32>, &[usize]),
        options: &FitOptions,
        callbacks: &mut [&mut dyn Callback],
    ) -> Result<()> {
        let objective = self.oracle.objective().clone();
        while let Some(trial) = self.oracle.create_trial() {
            let trial_dir = self.trial_dir(&trial.trial_id);
            fs::create_dir_all(&trial_dir).map_err(|e| Error::io(&trial_dir, e))?;
            info!(
                trial_id = %trial.trial_id,
                max_trials = self.oracle.max_trials(),
                values = ?trial.hyperparameters.values(),
                "starting trial"
            );
            println!("\nSearch: Running Trial #{}", trial.trial_id);

            let mut hp = trial.hyperparameters.clone();
            let mut model = self.hypermodel.build(&mut hp)?;
            model.set_device(self.device.clone());

            let checkpoint_path = trial_dir.join(CHECKPOINT_FILE);
            let mut checkpoint = ModelCheckpoint::new(
                checkpoint_path.to_string_lossy(),
                objective.name.clone(),
                objective.direction,
            );
            let mut early_stopping = self
                .early_stopping_patience
                .map(|patience| EarlyStopping::new(objective.name.clone(), objective.direction, patience));

            let mut trial_callbacks: Vec<&mut dyn Callback> =
                callbacks.iter_mut().map(|cb| &mut **cb as &mut dyn Callback).collect();
            trial_callbacks.push(&mut checkpoint);
            if let Some(es) = early_stopping.as_mut() {
                trial_callbacks.push(es);
            }
            model.fit(x, y, Some(validation), options, &mut trial_callbacks)?;
            drop(trial_callbacks);

            let (best_step, score) = match checkpoint.best() {
                Some((epoch, value)) => (Some(epoch), Some(value)),
                None => (None, None),
            };
            let finished = self.oracle.end_trial(&trial.trial_id, hp, score, best_step)?.clone();
            finished.save(&trial_dir.join(TRIAL_FILE))?;
            self.oracle.save(&self.project_dir.join(ORACLE_FILE))?;

            match score {
                Some(score) => info!(
                    trial_id = %finished.trial_id,
                    score,
                    best_epoch = best_step.map_or(0, |e| e + 1),
                    objective = %objective.name,
                    "trial finished"
                ),
                None => warn!(trial_id = %finished.trial_id, objective = %objective.name, "trial produced no score"),
            }
            if let Some(best) = self.oracle.best_trials(1).first() {
                println!(
                    "Trial {} complete, {}: {:.4}, best so far: {:.4} (trial {})",
                    finished.trial_id,
                    objective.name,
                    score.unwrap_or(f64::NAN),
                    best.score.unwrap_or(f64::NAN),
                    best.trial_id
                );
            }
        }
        Ok(())
    }

    /// Hyperparameters of the `n` best trials, best first
    pub fn best_hyperparameters(&self, n: usize) -> Vec<HyperParameters> {
        self.oracle
            .best_trials(n)
            .into_iter()
            .map(|t| t.hyperparameters.clone())
            .collect()
    }

    /// The `n` best trials' models, loaded from their best-epoch checkpoints
    pub fn best_models(&self, n: usize) -> Result<Vec<Model>> {
        self.oracle
            .best_trials(n)
            .into_iter()
            .map(|t| {
                let mut model = Model::load(self.trial_dir(&t.trial_id).join(CHECKPOINT_FILE))?;
                model.set_device(self.device.clone());
                Ok(model)
            })
            .collect()
    }

    pub fn best_model(&self) -> Result<(Model, HyperParameters)> {
        let model = self.best_models(1)?.into_iter().next().ok_or(Error::NoTrials)?;
        let hp = self
            .best_hyperparameters(1)
            .into_iter()
            .next()
            .ok_or(Error::NoTrials)?;
        Ok((model, hp))
    }

    /// Plain-text table of the best trials
    pub fn results_summary(&self, n: usize) -> String {
        let objective = self.oracle.objective();
        let mut out = format!(
            "Results summary\nResults in {}\nShowing {} best trials\nObjective: {} ({:?})\n",
            self.project_dir.display(),
            n,
            objective.name,
            objective.direction
        );
        for trial in self.oracle.best_trials(n) {
            out.push_str(&format!("\nTrial {} summary\nHyperparameters:\n", trial.trial_id));
            for (name, value) in trial.hyperparameters.values() {
                out.push_str(&format!("{name}: {}\n", value.as_f64()));
            }
            out.push_str(&format!("Score: {}\n", trial.score.unwrap_or(f64::NAN)));
        }
        out
    }
}
