use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Enum representing different activation function types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationType {
    ReLU,
    Softmax,
    Linear,
}

impl ActivationType {
    /// Applies the activation to a batch, one sample per row
    pub fn forward(&self, mut x: Array2<f32>) -> Array2<f32> {
        match self {
            ActivationType::ReLU => {
                x.mapv_inplace(|v| v.max(0.0));
                x
            }
            ActivationType::Softmax => {
                for mut row in x.axis_iter_mut(Axis(0)) {
                    // Shift by the row max so exp never overflows
                    let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|v| v / sum);
                }
                x
            }
            ActivationType::Linear => x,
        }
    }

    /// Computes the element-wise derivative at a preactivation value.
    /// Softmax has no element-wise derivative; its gradient is folded into the loss.
    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationType::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationType::Softmax | ActivationType::Linear => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_activation_functions() {
        let relu = ActivationType::ReLU.forward(array![[-1.0, 2.0]]);
        assert_eq!(relu, array![[0.0, 2.0]]);

        let linear = ActivationType::Linear.forward(array![[5.0, -3.0]]);
        assert_eq!(linear, array![[5.0, -3.0]]);

        let softmax = ActivationType::Softmax.forward(array![[1.0, 1.0], [0.0, 1000.0]]);
        assert_abs_diff_eq!(softmax[[0, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(softmax[[0, 1]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(softmax[[1, 1]], 1.0, epsilon = 1e-6);
        assert!(softmax.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_activation_derivatives() {
        assert_eq!(ActivationType::ReLU.derivative(-1.0), 0.0);
        assert_eq!(ActivationType::ReLU.derivative(2.0), 1.0);
        assert_eq!(ActivationType::Linear.derivative(5.0), 1.0);
    }
}
