pub mod activation;
pub mod batch_norm;
pub mod dense;
pub mod dropout;

use std::fmt::Debug;

use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::activation::ActivationType;
use crate::device::Device;
use crate::error::{Error, Result};

/// A trainable tensor and the gradient from the last backward pass
pub struct Param<'a> {
    pub value: ArrayViewMutD<'a, f32>,
    pub grad: ArrayViewD<'a, f32>,
}

/// One stage of a sequential network. Batches are `samples × features`.
pub trait Layer: Debug {
    /// Training-mode forward pass, caches what `backward` needs
    fn forward(&mut self, input: &Array2<f32>, device: &Device) -> Array2<f32>;

    /// Inference-mode forward pass, leaves caches untouched
    fn infer(&self, input: &Array2<f32>, device: &Device) -> Array2<f32>;

    /// Takes the gradient w.r.t. this layer's output, returns it w.r.t. the input
    fn backward(&mut self, grad_output: &Array2<f32>, device: &Device) -> Array2<f32>;

    fn params_mut(&mut self) -> Vec<Param<'_>> {
        Vec::new()
    }

    fn parameter_count(&self) -> usize {
        0
    }

    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;

    fn state(&self) -> LayerState;

    fn clone_box(&self) -> Box<dyn Layer>;
}

impl Clone for Box<dyn Layer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Serialized form of a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerState {
    Dense {
        activation: ActivationType,
        weights: Array2<f32>,
        bias: Array1<f32>,
    },
    BatchNorm {
        momentum: f32,
        epsilon: f32,
        gamma: Array1<f32>,
        beta: Array1<f32>,
        moving_mean: Array1<f32>,
        moving_variance: Array1<f32>,
    },
    Activation {
        features: usize,
        activation: ActivationType,
    },
    Dropout {
        features: usize,
        rate: f32,
        seed: u64,
    },
}

impl LayerState {
    pub fn into_layer(self) -> Result<Box<dyn Layer>> {
        match self {
            LayerState::Dense {
                activation,
                weights,
                bias,
            } => {
                if weights.ncols() != bias.len() {
                    return Err(Error::Shape(format!(
                        "dense weights have {} columns, bias has {}",
                        weights.ncols(),
                        bias.len()
                    )));
                }
                Ok(Box::new(DenseLayer::from_parts(weights, bias, activation)))
            }
            LayerState::BatchNorm {
                momentum,
                epsilon,
                gamma,
                beta,
                moving_mean,
                moving_variance,
            } => {
                let n = gamma.len();
                if beta.len() != n || moving_mean.len() != n || moving_variance.len() != n {
                    return Err(Error::Shape(
                        "batch norm parameters differ in length".to_string(),
                    ));
                }
                let mut layer = BatchNormLayer::new(n);
                layer.momentum = momentum;
                layer.epsilon = epsilon;
                layer.gamma = gamma;
                layer.beta = beta;
                layer.moving_mean = moving_mean;
                layer.moving_variance = moving_variance;
                Ok(Box::new(layer))
            }
            LayerState::Activation {
                features,
                activation,
            } => Ok(Box::new(ActivationLayer::new(features, activation))),
            LayerState::Dropout {
                features,
                rate,
                seed,
            } => {
                if !(0.0..1.0).contains(&rate) {
                    return Err(Error::invalid_hp("dropout", format!("rate {rate} outside [0, 1)")));
                }
                Ok(Box::new(DropoutLayer::new(features, rate, seed)))
            }
        }
    }
}

pub use activation::ActivationLayer;
pub use batch_norm::BatchNormLayer;
pub use dense::{DenseLayer, WeightInit};
pub use dropout::DropoutLayer;
