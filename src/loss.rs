use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Loss {
    /// Cross entropy against integer class labels, expects softmax probabilities
    SparseCategoricalCrossEntropy,
}

impl Loss {
    /// Mean loss over the batch. `weights` holds one weight per sample.
    pub fn calculate(
        &self,
        predictions: ArrayView2<f32>,
        targets: &[usize],
        weights: Option<&[f32]>,
    ) -> Result<f32> {
        check_batch(predictions, targets, weights)?;
        match self {
            Loss::SparseCategoricalCrossEntropy => {
                let n = targets.len();
                if n == 0 {
                    return Ok(0.0);
                }
                let mut total = 0.0f32;
                for (i, (row, &target)) in predictions.axis_iter(Axis(0)).zip(targets).enumerate() {
                    let p = row[target].clamp(EPSILON, 1.0 - EPSILON);
                    let w = weights.map_or(1.0, |w| w[i]);
                    total -= w * p.ln();
                }
                Ok(total / n as f32)
            }
        }
    }

    /// Gradient of the mean loss with respect to the softmax logits
    pub fn gradient(
        &self,
        predictions: ArrayView2<f32>,
        targets: &[usize],
        weights: Option<&[f32]>,
    ) -> Result<Array2<f32>> {
        check_batch(predictions, targets, weights)?;
        match self {
            Loss::SparseCategoricalCrossEntropy => {
                let n = targets.len().max(1) as f32;
                let mut grad = predictions.to_owned();
                for (i, (mut row, &target)) in grad.axis_iter_mut(Axis(0)).zip(targets).enumerate() {
                    row[target] -= 1.0;
                    let w = weights.map_or(1.0, |w| w[i]);
                    row.mapv_inplace(|g| g * w / n);
                }
                Ok(grad)
            }
        }
    }
}

fn check_batch(predictions: ArrayView2<f32>, targets: &[usize], weights: Option<&[f32]>) -> Result<()> {
    let (rows, classes) = predictions.dim();
    if rows != targets.len() {
        return Err(Error::Shape(format!(
            "{rows} predictions for {} targets",
            targets.len()
        )));
    }
    if let Some(&bad) = targets.iter().find(|&&t| t >= classes) {
        return Err(Error::Shape(format!(
            "label {bad} out of range for {classes} classes"
        )));
    }
    if let Some(w) = weights {
        if w.len() != rows {
            return Err(Error::Shape(format!("{} weights for {rows} samples", w.len())));
        }
    }
    Ok(())
}
