//! Classification scores averaged across classes
//!
//! Scores are computed over the union of labels seen in the ground truth
//! and in the predictions. A class that is never predicted has precision 0,
//! and the weighted average uses each class's true support.

use std::collections::BTreeSet;

use ndarray::{ArrayView2, Axis};

use crate::error::{Error, Result};

/// Per-class precision, recall, F1 and support
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationReport {
    pub labels: Vec<usize>,
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f1: Vec<f64>,
    pub support: Vec<usize>,
}

/// Support-weighted averages of the three scores
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedScores {
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
}

impl ClassificationReport {
    pub fn from_predictions(y_pred: &[usize], y_true: &[usize]) -> Result<Self> {
        if y_pred.len() != y_true.len() {
            return Err(Error::Shape(format!(
                "{} predictions for {} labels",
                y_pred.len(),
                y_true.len()
            )));
        }
        let labels: Vec<usize> = y_true
            .iter()
            .chain(y_pred.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut precision = Vec::with_capacity(labels.len());
        let mut recall = Vec::with_capacity(labels.len());
        let mut f1 = Vec::with_capacity(labels.len());
        let mut support = Vec::with_capacity(labels.len());

        for &label in &labels {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (&p, &t) in y_pred.iter().zip(y_true) {
                match (p == label, t == label) {
                    (true, true) => tp += 1,
                    (true, false) => fp += 1,
                    (false, true) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let p = ratio(tp, tp + fp);
            let r = ratio(tp, tp + fn_);
            let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
            precision.push(p);
            recall.push(r);
            f1.push(f);
            support.push(tp + fn_);
        }

        Ok(ClassificationReport {
            labels,
            precision,
            recall,
            f1,
            support,
        })
    }

    pub fn weighted(&self) -> WeightedScores {
        WeightedScores {
            f1: self.weighted_mean(&self.f1),
            precision: self.weighted_mean(&self.precision),
            recall: self.weighted_mean(&self.recall),
        }
    }

    fn weighted_mean(&self, values: &[f64]) -> f64 {
        let total: usize = self.support.iter().sum();
        if total == 0 {
            return 0.0;
        }
        values
            .iter()
            .zip(&self.support)
            .map(|(&v, &s)| v * s as f64)
            .sum::<f64>()
            / total as f64
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Weighted F1, precision and recall in one call
pub fn weighted_scores(y_pred: &[usize], y_true: &[usize]) -> Result<WeightedScores> {
    Ok(ClassificationReport::from_predictions(y_pred, y_true)?.weighted())
}

/// Index of the largest entry in each row
pub fn argmax_rows(values: ArrayView2<f32>) -> Vec<usize> {
    values
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                    if v > max {
                        (i, v)
                    } else {
                        (best, max)
                    }
                })
                .0
        })
        .collect()
}

/// Fraction of predictions equal to the labels
pub fn accuracy(y_pred: &[usize], y_true: &[usize]) -> f64 {
    let correct = y_pred.iter().zip(y_true).filter(|(p, t)| p == t).count();
    ratio(correct, y_true.len())
}
