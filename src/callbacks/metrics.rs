use ndarray::{Array2, Axis};

use super::{Callback, CallbackAction};
use crate::error::{Error, Result};
use crate::history::Logs;
use crate::metrics::{argmax_rows, weighted_scores, WeightedScores};
use crate::model::Model;

/// Held-out labels, either as class indices or as a per-class matrix
#[derive(Debug, Clone, PartialEq)]
pub enum Labels {
    Indices(Vec<usize>),
    /// One row per sample. A single column holds the class index, several
    /// columns hold one-hot or probability rows.
    Matrix(Array2<f32>),
}

impl Labels {
    pub fn to_indices(&self) -> Vec<usize> {
        match self {
            Labels::Indices(indices) => indices.clone(),
            Labels::Matrix(m) if m.ncols() == 1 => {
                m.column(0).iter().map(|&v| v.round().max(0.0) as usize).collect()
            }
            Labels::Matrix(m) => argmax_rows(m.view()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Labels::Indices(indices) => indices.len(),
            Labels::Matrix(m) => m.len_of(Axis(0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<usize>> for Labels {
    fn from(indices: Vec<usize>) -> Self {
        Labels::Indices(indices)
    }
}

impl From<Array2<f32>> for Labels {
    fn from(matrix: Array2<f32>) -> Self {
        Labels::Matrix(matrix)
    }
}

/// Scores the model on a fixed validation set after every epoch and adds
/// `val_f1`, `val_recall` and `val_precision` to the epoch logs.
#[derive(Debug, Clone)]
pub struct ValidationMetrics {
    features: Array2<f32>,
    targets: Vec<usize>,
    verbose: bool,
    last: Option<WeightedScores>,
}

impl ValidationMetrics {
    pub fn new(features: Array2<f32>, labels: impl Into<Labels>) -> Result<Self> {
        let labels = labels.into();
        if labels.len() != features.nrows() {
            return Err(Error::Shape(format!(
                "{} validation rows for {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        Ok(ValidationMetrics {
            features,
            targets: labels.to_indices(),
            verbose: true,
            last: None,
        })
    }

    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }

    /// Scores from the most recent epoch
    pub fn last_scores(&self) -> Option<WeightedScores> {
        self.last
    }

    pub fn score(&self, model: &Model) -> Result<WeightedScores> {
        let probabilities = model.predict(&self.features)?;
        let predicted = argmax_rows(probabilities.view());
        weighted_scores(&predicted, &self.targets)
    }
}

impl Callback for ValidationMetrics {
    fn on_epoch_end(&mut self, _epoch: usize, model: &Model, logs: &mut Logs) -> Result<CallbackAction> {
        let scores = self.score(model)?;
        logs.insert("val_f1".to_string(), scores.f1);
        logs.insert("val_recall".to_string(), scores.recall);
        logs.insert("val_precision".to_string(), scores.precision);
        if self.verbose {
            println!(
                " - val_f1: {:.6} - val_precision: {:.6} - val_recall: {:.6}",
                scores.f1, scores.precision, scores.recall
            );
        }
        self.last = Some(scores);
        Ok(CallbackAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_single_column_matrix_is_indices() {
        let labels = Labels::Matrix(array![[2.0], [0.0], [1.0]]);
        assert_eq!(labels.to_indices(), vec![2, 0, 1]);
    }

    #[test]
    fn test_one_hot_matrix_is_reduced() {
        let labels = Labels::Matrix(array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]);
        assert_eq!(labels.to_indices(), vec![2, 0]);
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_rejects_row_mismatch() {
        let features = Array2::zeros((3, 2));
        assert!(ValidationMetrics::new(features, vec![0, 1]).is_err());
    }
}
