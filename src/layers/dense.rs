use crate::activation::ActivationType;
use crate::device::Device;
use crate::layers::Layer;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

use super::{LayerState, Param};

/// Weight initialization strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightInit {
    /// Uniform in ±sqrt(6 / (inputs + neurons))
    GlorotUniform,
    /// Normal with std sqrt(2 / inputs), suited to ReLU stacks
    HeNormal,
}

/// Fully connected layer, `y = activation(x · W + b)` with `W` shaped `inputs × neurons`
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    pub activation: ActivationType,
    pub weight_grads: Array2<f32>,
    pub bias_grads: Array1<f32>,
    input_cache: Option<Array2<f32>>,
    preactivation_cache: Option<Array2<f32>>,
}

impl DenseLayer {
    pub fn new<R: Rng>(
        inputs: usize,
        neurons: usize,
        activation: ActivationType,
        init: WeightInit,
        rng: &mut R,
    ) -> Self {
        let weights = match init {
            WeightInit::GlorotUniform => {
                let limit = (6.0 / (inputs + neurons) as f32).sqrt();
                Array2::from_shape_fn((inputs, neurons), |_| rng.random_range(-limit..limit))
            }
            WeightInit::HeNormal => {
                let std_dev = (2.0 / inputs as f32).sqrt();
                Array2::from_shape_fn((inputs, neurons), |_| {
                    let z: f32 = rng.sample(StandardNormal);
                    z * std_dev
                })
            }
        };
        Self::from_parts(weights, Array1::zeros(neurons), activation)
    }

    pub fn from_parts(weights: Array2<f32>, bias: Array1<f32>, activation: ActivationType) -> Self {
        let weight_grads = Array2::zeros(weights.raw_dim());
        let bias_grads = Array1::zeros(bias.raw_dim());
        DenseLayer {
            weights,
            bias,
            activation,
            weight_grads,
            bias_grads,
            input_cache: None,
            preactivation_cache: None,
        }
    }

    fn preactivation(&self, input: &Array2<f32>, device: &Device) -> Array2<f32> {
        assert_eq!(
            input.ncols(),
            self.weights.nrows(),
            "Input size does not match layer's input size"
        );
        device.matmul(input.view(), self.weights.view()) + &self.bias
    }
}

impl Layer for DenseLayer {
    fn forward(&mut self, input: &Array2<f32>, device: &Device) -> Array2<f32> {
        let output = self.preactivation(input, device);
        self.input_cache = Some(input.clone());
        if self.activation == ActivationType::ReLU {
            self.preactivation_cache = Some(output.clone());
        }
        self.activation.forward(output)
    }

    fn infer(&self, input: &Array2<f32>, device: &Device) -> Array2<f32> {
        self.activation.forward(self.preactivation(input, device))
    }

    fn backward(&mut self, grad_output: &Array2<f32>, device: &Device) -> Array2<f32> {
        // Softmax gradients arrive already taken w.r.t. the logits
        let dlayer = match (&self.activation, &self.preactivation_cache) {
            (ActivationType::ReLU, Some(pre)) => {
                grad_output * &pre.mapv(|x| self.activation.derivative(x))
            }
            _ => grad_output.clone(),
        };

        let input = self
            .input_cache
            .as_ref()
            .expect("backward called before forward");
        self.weight_grads = device.matmul(input.t(), dlayer.view());
        self.bias_grads = dlayer.sum_axis(Axis(0));

        device.matmul(dlayer.view(), self.weights.t())
    }

    fn params_mut(&mut self) -> Vec<Param<'_>> {
        vec![
            Param {
                value: self.weights.view_mut().into_dyn(),
                grad: self.weight_grads.view().into_dyn(),
            },
            Param {
                value: self.bias.view_mut().into_dyn(),
                grad: self.bias_grads.view().into_dyn(),
            },
        ]
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    fn input_dim(&self) -> usize {
        self.weights.nrows()
    }

    fn output_dim(&self) -> usize {
        self.weights.ncols()
    }

    fn state(&self) -> LayerState {
        LayerState::Dense {
            activation: self.activation,
            weights: self.weights.clone(),
            bias: self.bias.clone(),
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
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_glorot_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = DenseLayer::new(11, 64, ActivationType::Linear, WeightInit::GlorotUniform, &mut rng);
        let limit = (6.0f32 / 75.0).sqrt();
        assert_eq!(layer.weights.dim(), (11, 64));
        assert!(layer.weights.iter().all(|w| w.abs() <= limit));
        assert!(layer.bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut layer = DenseLayer::new(3, 2, ActivationType::ReLU, WeightInit::HeNormal, &mut rng);
        layer.bias = array![0.5, 0.5];
        let input = array![[0.3, -0.2, 0.9], [1.0, 0.4, -0.5]];
        let device = Device::Cpu;

        // Loss = sum of outputs, so dL/dy is all ones
        layer.forward(&input, &device);
        let ones = Array2::ones((2, 2));
        layer.backward(&ones, &device);
        let analytic = layer.weight_grads.clone();

        let h = 1e-3;
        for i in 0..3 {
            for j in 0..2 {
                let mut plus = layer.clone();
                plus.weights[[i, j]] += h;
                let mut minus = layer.clone();
                minus.weights[[i, j]] -= h;
                let numeric = (plus.infer(&input, &device).sum() - minus.infer(&input, &device).sum()) / (2.0 * h);
                assert_abs_diff_eq!(analytic[[i, j]], numeric, epsilon = 1e-2);
            }
        }
    }
}
