use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Standardizes each feature to zero mean and unit variance.
/// Constant features keep a scale of 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f32>,
    pub scale: Array1<f32>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f32>) -> Result<Self> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::Shape("cannot fit a scaler on zero rows".to_string()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s });
        Ok(StandardScaler { mean, scale })
    }

    pub fn transform(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.mean.len() {
            return Err(Error::Shape(format!(
                "scaler fitted on {} features, got {}",
                self.mean.len(),
                x.ncols()
            )));
        }
        Ok((x - &self.mean) / &self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_fit_transform() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        assert_eq!(scaler.mean, array![2.0, 5.0]);
        assert_eq!(scaler.scale, array![1.0, 1.0]);
        let z = scaler.transform(&x).unwrap();
        assert_abs_diff_eq!(z[[0, 0]], -1.0);
        assert_abs_diff_eq!(z[[1, 0]], 1.0);
        assert_abs_diff_eq!(z[[0, 1]], 0.0);
    }

    #[test]
    fn test_transform_uses_training_statistics() {
        let scaler = StandardScaler::fit(&array![[0.0], [4.0]]).unwrap();
        let z = scaler.transform(&array![[6.0]]).unwrap();
        assert_abs_diff_eq!(z[[0, 0]], 2.0);
        assert!(scaler.transform(&array![[1.0, 2.0]]).is_err());
    }
}
