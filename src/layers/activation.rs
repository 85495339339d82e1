use ndarray::Array2;

use super::{Layer, LayerState};
use crate::activation::ActivationType;
use crate::device::Device;

/// Standalone activation, applied after batch normalization
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    features: usize,
    activation: ActivationType,
    preactivation_cache: Option<Array2<f32>>,
}

impl ActivationLayer {
    pub fn new(features: usize, activation: ActivationType) -> Self {
        ActivationLayer {
            features,
            activation,
            preactivation_cache: None,
        }
    }
}

impl Layer for ActivationLayer {
    fn forward(&mut self, input: &Array2<f32>, _device: &Device) -> Array2<f32> {
        self.preactivation_cache = Some(input.clone());
        self.activation.forward(input.clone())
    }

    fn infer(&self, input: &Array2<f32>, _device: &Device) -> Array2<f32> {
        self.activation.forward(input.clone())
    }

    fn backward(&mut self, grad_output: &Array2<f32>, _device: &Device) -> Array2<f32> {
        match &self.preactivation_cache {
            Some(pre) => grad_output * &pre.mapv(|x| self.activation.derivative(x)),
            None => grad_output.clone(),
        }
    }

    fn input_dim(&self) -> usize {
        self.features
    }

    fn output_dim(&self) -> usize {
        self.features
    }

    fn state(&self) -> LayerState {
        LayerState::Activation {
            features: self.features,
            activation: self.activation,
        }
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}
