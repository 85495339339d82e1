//! Bayesian optimization oracle
//!
//! Proposes hyperparameter values for each new trial. The first trial uses
//! the defaults, the next `num_initial_points` are drawn uniformly, and the
//! rest maximize an acquisition function over a Gaussian-process surrogate
//! fitted on the completed trials.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::gaussian_process::{normal_cdf, normal_pdf, GaussianProcess};
use super::hyperparameters::{HyperParameter, HyperParameters, Value};
use super::trial::{Trial, TrialStatus};
use super::Objective;
use crate::callbacks::Mode;
use crate::error::{Error, Result};

/// Proposals drawn before falling back to a possibly repeated random one
const MAX_RETRIES: usize = 50;

/// Acquisition function maximized over the surrogate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    #[default]
    ExpectedImprovement,
    UpperConfidenceBound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub num_initial_points: usize,
    pub acquisition: Acquisition,
    /// Exploration weight of the upper confidence bound
    pub beta: f64,
    /// Improvement margin of expected improvement
    pub xi: f64,
    /// Random candidates scored per proposal
    pub num_candidates: usize,
    pub length_scale: f64,
    /// Noise added to the kernel diagonal
    pub alpha: f64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        OracleSettings {
            num_initial_points: 2,
            acquisition: Acquisition::ExpectedImprovement,
            beta: 2.6,
            xi: 0.01,
            num_candidates: 2000,
            length_scale: 1.0,
            alpha: 1e-4,
        }
    }
}

impl OracleSettings {
    fn acquire(&self, mean: f64, std: f64, best: f64) -> f64 {
        match self.acquisition {
            Acquisition::UpperConfidenceBound => mean + self.beta * std,
            Acquisition::ExpectedImprovement => {
                let improvement = mean - best - self.xi;
                if std <= 1e-12 {
                    return improvement.max(0.0);
                }
                let z = improvement / std;
                improvement * normal_cdf(z) + std * normal_pdf(z)
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OracleState {
    objective: Objective,
    seed: u64,
    space: HyperParameters,
    trials: Vec<Trial>,
}

#[derive(Debug, Clone)]
pub struct BayesianOracle {
    objective: Objective,
    max_trials: usize,
    settings: OracleSettings,
    seed: u64,
    rng: StdRng,
    space: HyperParameters,
    trials: Vec<Trial>,
}

impl BayesianOracle {
    pub fn new(objective: Objective, max_trials: usize, settings: OracleSettings, seed: u64) -> Self {
        BayesianOracle {
            objective,
            max_trials,
            settings,
            seed,
            rng: StdRng::seed_from_u64(seed),
            space: HyperParameters::new(),
            trials: Vec::new(),
        }
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn max_trials(&self) -> usize {
        self.max_trials
    }

    pub fn space(&self) -> &HyperParameters {
        &self.space
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// Adds any domains `hp` registered that the oracle has not seen yet
    pub fn register_space(&mut self, hp: &HyperParameters) {
        self.space.merge_space(hp);
    }

    /// Score oriented so that larger is better
    fn oriented(&self, score: f64) -> f64 {
        match self.objective.direction {
            Mode::Max => score,
            Mode::Min => -score,
        }
    }

    /// Next trial to run, `None` once `max_trials` have been created
    pub fn create_trial(&mut self) -> Option<Trial> {
        if self.trials.len() >= self.max_trials {
            return None;
        }
        let values = self.populate();
        let trial = Trial::new(self.trials.len(), self.space.with_values(values));
        debug!(trial_id = %trial.trial_id, values = ?trial.hyperparameters.values(), "trial proposed");
        self.trials.push(trial.clone());
        Some(trial)
    }

    /// Records the outcome of a running trial. A missing or non-finite score marks it invalid.
    pub fn end_trial(
        &mut self,
        trial_id: &str,
        hyperparameters: HyperParameters,
        score: Option<f64>,
        best_step: Option<usize>,
    ) -> Result<&Trial> {
        self.space.merge_space(&hyperparameters);
        let trial = self
            .trials
            .iter_mut()
            .find(|t| t.trial_id == trial_id)
            .ok_or_else(|| Error::Config(format!("unknown trial {trial_id}")))?;
        let score = score.filter(|s| s.is_finite());
        trial.hyperparameters = hyperparameters;
        trial.status = if score.is_some() {
            TrialStatus::Completed
        } else {
            TrialStatus::Invalid
        };
        trial.score = score;
        trial.best_step = best_step;
        Ok(trial)
    }

    /// Up to `n` completed trials, best first
    pub fn best_trials(&self, n: usize) -> Vec<&Trial> {
        let mut completed: Vec<&Trial> = self.trials.iter().filter(|t| t.is_completed()).collect();
        completed.sort_by(|a, b| {
            let a = self.oriented(a.score.unwrap_or(f64::NEG_INFINITY));
            let b = self.oriented(b.score.unwrap_or(f64::NEG_INFINITY));
            b.total_cmp(&a)
        });
        completed.truncate(n);
        completed
    }

    fn populate(&mut self) -> BTreeMap<String, Value> {
        let space = self.space.space().to_vec();
        if self.trials.is_empty() {
            return space
                .iter()
                .map(|hp| (hp.name.clone(), hp.domain.default_value()))
                .collect();
        }

        let tried: Vec<Vec<f64>> = self.trials.iter().map(|t| t.hyperparameters.encode(&space)).collect();
        let completed = self.trials.iter().filter(|t| t.is_completed()).count();
        if completed > self.settings.num_initial_points && !space.is_empty() {
            if let Some(values) = self.bayesian_proposal(&space, &tried) {
                return values;
            }
        }
        self.random_proposal(&space, &tried)
    }

    fn random_proposal(&mut self, space: &[HyperParameter], tried: &[Vec<f64>]) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        for _ in 0..MAX_RETRIES {
            values = space
                .iter()
                .map(|hp| (hp.name.clone(), hp.domain.sample(&mut self.rng)))
                .collect();
            let point = self.space.with_values(values.clone()).encode(space);
            if !tried.contains(&point) {
                break;
            }
        }
        values
    }

    fn bayesian_proposal(&mut self, space: &[HyperParameter], tried: &[Vec<f64>]) -> Option<BTreeMap<String, Value>> {
        let completed: Vec<&Trial> = self.trials.iter().filter(|t| t.is_completed()).collect();
        let dim = space.len();
        let x = Array2::from_shape_vec(
            (completed.len(), dim),
            completed
                .iter()
                .flat_map(|t| t.hyperparameters.encode(space))
                .collect(),
        )
        .ok()?;
        let y: Vec<f64> = completed
            .iter()
            .map(|t| self.oriented(t.score.unwrap_or(0.0)))
            .collect();
        let best = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let gp = match GaussianProcess::fit(x, &y, self.settings.length_scale, self.settings.alpha) {
            Ok(gp) => gp,
            Err(e) => {
                warn!(error = %e, "surrogate fit failed, sampling at random");
                return None;
            }
        };

        let mut chosen: Option<(f64, BTreeMap<String, Value>)> = None;
        for _ in 0..self.settings.num_candidates {
            let raw: Vec<f64> = (0..dim).map(|_| self.rng.random::<f64>()).collect();
            let values = HyperParameters::decode(space, &raw);
            // score the snapped grid point, not the raw draw
            let point = self.space.with_values(values.clone()).encode(space);
            if tried.contains(&point) {
                continue;
            }
            let (mean, std) = gp.predict(ArrayView1::from(&point[..]));
            let score = self.settings.acquire(mean, std, best);
            if chosen.as_ref().map_or(true, |(s, _)| score > *s) {
                chosen = Some((score, values));
            }
        }
        chosen.map(|(_, values)| values)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let state = OracleState {
            objective: self.objective.clone(),
            seed: self.seed,
            space: self.space.clone(),
            trials: self.trials.clone(),
        };
        let json = serde_json::to_string_pretty(&state)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    /// Restores finished trials from an `oracle.json`. Trials left running
    /// by an interrupted search are dropped and will be proposed again.
    pub fn restore(&mut self, path: &Path) -> Result<()> {
        let json = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let state: OracleState = serde_json::from_str(&json)?;
        if state.objective != self.objective {
            return Err(Error::Config(format!(
                "{} was searched for {:?}, not {:?}",
                path.display(),
                state.objective,
                self.objective
            )));
        }
        self.space.merge_space(&state.space);
        self.trials = state
            .trials
            .into_iter()
            .filter(|t| t.status != TrialStatus::Running)
            .collect();
        self.rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.trials.len() as u64));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> HyperParameters {
        let mut hp = HyperParameters::new();
        hp.int("units", 64, 1024, 64).unwrap();
        hp.float("rate", 0.0, 0.75, Some(0.05)).unwrap();
        hp.choice("learning_rate", &[1e-2, 1e-3, 1e-4]).unwrap();
        hp
    }

    fn oracle(max_trials: usize) -> BayesianOracle {
        let mut oracle = BayesianOracle::new(
            Objective::new("val_f1", Mode::Max),
            max_trials,
            OracleSettings {
                num_candidates: 200,
                ..OracleSettings::default()
            },
            11,
        );
        oracle.register_space(&space());
        oracle
    }

    /// Peaks at units = 512
    fn score(trial: &Trial) -> f64 {
        let units = trial.hyperparameters.get("units").map_or(0.0, |v| v.as_f64());
        1.0 - ((units - 512.0) / 1024.0).powi(2)
    }

    #[test]
    fn test_first_trial_uses_defaults() {
        let mut oracle = oracle(3);
        let trial = oracle.create_trial().unwrap();
        assert_eq!(trial.trial_id, "00");
        assert_eq!(trial.hyperparameters.get("units"), Some(Value::Int(64)));
        assert_eq!(trial.hyperparameters.get("learning_rate"), Some(Value::Float(1e-2)));
    }

    #[test]
    fn test_stops_at_max_trials_and_avoids_repeats() {
        let mut oracle = oracle(8);
        let mut seen = Vec::new();
        while let Some(trial) = oracle.create_trial() {
            let s = score(&trial);
            let point = trial.hyperparameters.encode(oracle.space().space());
            assert!(!seen.contains(&point), "repeated proposal");
            seen.push(point);
            oracle
                .end_trial(&trial.trial_id, trial.hyperparameters.clone(), Some(s), Some(0))
                .unwrap();
        }
        assert_eq!(oracle.trials().len(), 8);
        for trial in oracle.trials() {
            for hp in oracle.space().space() {
                assert!(hp.domain.contains(&trial.hyperparameters.get(&hp.name).unwrap()));
            }
        }
        let best = oracle.best_trials(3);
        assert_eq!(best.len(), 3);
        assert!(best[0].score >= best[1].score && best[1].score >= best[2].score);
    }

    #[test]
    fn test_min_direction_ranks_lowest_first() {
        let mut oracle = BayesianOracle::new(Objective::new("val_loss", Mode::Min), 3, OracleSettings::default(), 0);
        oracle.register_space(&space());
        for s in [0.5, 0.2, 0.9] {
            let trial = oracle.create_trial().unwrap();
            oracle.end_trial(&trial.trial_id, trial.hyperparameters, Some(s), None).unwrap();
        }
        assert_eq!(oracle.best_trials(1)[0].score, Some(0.2));
    }

    #[test]
    fn test_nan_score_marks_trial_invalid() {
        let mut oracle = oracle(2);
        let trial = oracle.create_trial().unwrap();
        let ended = oracle.end_trial(&trial.trial_id, trial.hyperparameters, Some(f64::NAN), None).unwrap();
        assert_eq!(ended.status, TrialStatus::Invalid);
        assert!(oracle.best_trials(1).is_empty());
    }

    #[test]
    fn test_expected_improvement() {
        let settings = OracleSettings::default();
        // certain and no better than the incumbent
        assert_eq!(settings.acquire(0.5, 0.0, 0.6), 0.0);
        // uncertainty alone is worth something
        assert!(settings.acquire(0.5, 0.2, 0.6) > 0.0);
        assert!(settings.acquire(0.7, 0.1, 0.6) > settings.acquire(0.5, 0.1, 0.6));
    }

    #[test]
    fn test_restore_drops_running_trials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.json");

        let mut first = oracle(5);
        let done = first.create_trial().unwrap();
        first.end_trial(&done.trial_id, done.hyperparameters, Some(0.4), Some(2)).unwrap();
        first.create_trial().unwrap();
        first.save(&path).unwrap();

        let mut resumed = oracle(5);
        resumed.restore(&path).unwrap();
        assert_eq!(resumed.trials().len(), 1);
        assert_eq!(resumed.trials()[0].score, Some(0.4));
        assert_eq!(resumed.create_trial().unwrap().trial_id, "01");

        let mut other = BayesianOracle::new(Objective::new("val_loss", Mode::Min), 5, OracleSettings::default(), 0);
        assert!(other.restore(&path).is_err());
    }
}
