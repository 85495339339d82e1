use ndarray::{Array1, Array2, Axis};

use super::{Layer, LayerState, Param};
use crate::device::Device;

/// Per-feature batch normalization.
///
/// Training batches are normalized with their own mean and variance and
/// fold them into the moving statistics; inference uses the moving ones.
#[derive(Debug, Clone)]
pub struct BatchNormLayer {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    pub moving_mean: Array1<f32>,
    pub moving_variance: Array1<f32>,
    pub momentum: f32,
    pub epsilon: f32,
    gamma_grads: Array1<f32>,
    beta_grads: Array1<f32>,
    normalized_cache: Option<Array2<f32>>,
    inv_std_cache: Option<Array1<f32>>,
}

impl BatchNormLayer {
    pub fn new(features: usize) -> Self {
        BatchNormLayer {
            gamma: Array1::ones(features),
            beta: Array1::zeros(features),
            moving_mean: Array1::zeros(features),
            moving_variance: Array1::ones(features),
            momentum: 0.99,
            epsilon: 1e-3,
            gamma_grads: Array1::zeros(features),
            beta_grads: Array1::zeros(features),
            normalized_cache: None,
            inv_std_cache: None,
        }
    }

    fn check_width(&self, input: &Array2<f32>) {
        assert_eq!(
            input.ncols(),
            self.gamma.len(),
            "Input size does not match layer's input size"
        );
    }
}

impl Layer for BatchNormLayer {
    fn forward(&mut self, input: &Array2<f32>, _device: &Device) -> Array2<f32> {
        self.check_width(input);
        let n = input.nrows().max(1) as f32;
        let mean = input.sum_axis(Axis(0)) / n;
        let centered = input - &mean;
        let variance = centered.mapv(|x| x * x).sum_axis(Axis(0)) / n;
        let inv_std = variance.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let normalized = &centered * &inv_std;

        let m = self.momentum;
        self.moving_mean = &self.moving_mean * m + &mean * (1.0 - m);
        self.moving_variance = &self.moving_variance * m + &variance * (1.0 - m);

        let output = &normalized * &self.gamma + &self.beta;
        self.normalized_cache = Some(normalized);
        self.inv_std_cache = Some(inv_std);
        output
    }

    fn infer(&self, input: &Array2<f32>, _device: &Device) -> Array2<f32> {
        self.check_width(input);
        let inv_std = self.moving_variance.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        (input - &self.moving_mean) * &inv_std * &self.gamma + &self.beta
    }

    fn backward(&mut self, grad_output: &Array2<f32>, _device: &Device) -> Array2<f32> {
        let (Some(normalized), Some(inv_std)) = (&self.normalized_cache, &self.inv_std_cache) else {
            panic!("backward called before forward");
        };
        let n = grad_output.nrows().max(1) as f32;

        self.beta_grads = grad_output.sum_axis(Axis(0));
        self.gamma_grads = (grad_output * normalized).sum_axis(Axis(0));

        // dx = inv_std / n * (n * dxhat - sum(dxhat) - xhat * sum(dxhat * xhat))
        let dnormalized = grad_output * &self.gamma;
        let sum_d = dnormalized.sum_axis(Axis(0));
        let sum_dx = (&dnormalized * normalized).sum_axis(Axis(0));
        let scale = inv_std / n;
        (&dnormalized * n - &sum_d - &(normalized * &sum_dx)) * &scale
    }

    fn params_mut(&mut self) -> Vec<Param<'_>> {
        vec![
            Param {
                value: self.gamma.view_mut().into_dyn(),
                grad: self.gamma_grads.view().into_dyn(),
            },
            Param {
                value: self.beta.view_mut().into_dyn(),
                grad: self.beta_grads.view().into_dyn(),
            },
        ]
    }

    fn parameter_count(&self) -> usize {
        // Moving statistics count as (non-trainable) parameters
        4 * self.gamma.len()
    }

    fn input_dim(&self) -> usize {
        self.gamma.len()
    }

    fn output_dim(&self) -> usize {
        self.gamma.len()
    }

    fn state(&self) -> LayerState {
        LayerState::BatchNorm {
            momentum: self.momentum,
            epsilon: self.epsilon,
            gamma: self.gamma.clone(),
            beta: self.beta.clone(),
            moving_mean: self.moving_mean.clone(),
            moving_variance: self.moving_variance.clone(),
        }
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_training_output_is_standardized() {
        let mut layer = BatchNormLayer::new(2);
        let input = array![[1.0, 10.0], [3.0, 20.0], [5.0, 30.0]];
        let out = layer.forward(&input, &Device::Cpu);
        for col in out.axis_iter(Axis(1)) {
            assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-4);
        }
        assert_abs_diff_eq!(layer.moving_mean[0], 0.03, epsilon = 1e-5);
        assert_abs_diff_eq!(layer.moving_mean[1], 0.2, epsilon = 1e-5);
    }

    #[test]
    fn test_fresh_layer_infers_identity() {
        let layer = BatchNormLayer::new(3);
        let input = array![[0.5, -1.0, 2.0]];
        let out = layer.infer(&input, &Device::Cpu);
        let scale = 1.0 / (1.0f32 + 1e-3).sqrt();
        for (o, i) in out.iter().zip(input.iter()) {
            assert_abs_diff_eq!(*o, i * scale, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_input_gradient_sums_to_zero() {
        // Shifting the whole batch does not change the normalized output
        let mut layer = BatchNormLayer::new(1);
        let input = array![[1.0], [2.0], [4.0]];
        layer.forward(&input, &Device::Cpu);
        let grad = layer.backward(&array![[0.3], [-1.0], [0.5]], &Device::Cpu);
        assert_abs_diff_eq!(grad.sum(), 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(layer.beta_grads[0], -0.2, epsilon = 1e-6);
    }
}
