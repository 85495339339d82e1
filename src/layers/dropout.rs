use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Layer, LayerState};
use crate::device::Device;

/// Inverted dropout: kept activations are scaled by `1 / (1 - rate)` during
/// training so inference is a plain pass-through.
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    features: usize,
    dropout_rate: f32,
    scale: f32,
    seed: u64,
    rng: StdRng,
    mask: Option<Array2<f32>>,
}

impl DropoutLayer {
    pub fn new(features: usize, dropout_rate: f32, seed: u64) -> Self {
        assert!(
            (0.0..1.0).contains(&dropout_rate),
            "Dropout rate must be between 0 and 1"
        );

        DropoutLayer {
            features,
            dropout_rate,
            scale: 1.0 / (1.0 - dropout_rate),
            seed,
            rng: StdRng::seed_from_u64(seed),
            mask: None,
        }
    }

    pub fn rate(&self) -> f32 {
        self.dropout_rate
    }
}

impl Layer for DropoutLayer {
    fn forward(&mut self, input: &Array2<f32>, _device: &Device) -> Array2<f32> {
        if self.dropout_rate == 0.0 {
            self.mask = None;
            return input.clone();
        }
        let (rate, scale) = (self.dropout_rate, self.scale);
        let rng = &mut self.rng;
        let mask = Array2::from_shape_fn(input.raw_dim(), |_| {
            if rng.random::<f32>() >= rate {
                scale
            } else {
                0.0
            }
        });
        let output = input * &mask;
        self.mask = Some(mask);
        output
    }

    fn infer(&self, input: &Array2<f32>, _device: &Device) -> Array2<f32> {
        input.clone()
    }

    fn backward(&mut self, grad_output: &Array2<f32>, _device: &Device) -> Array2<f32> {
        // During backprop, we multiply gradients by the same mask
        if let Some(ref mask) = self.mask {
            grad_output * mask
        } else {
            grad_output.clone()
        }
    }

    fn input_dim(&self) -> usize {
        self.features
    }

    fn output_dim(&self) -> usize {
        self.features
    }

    fn state(&self) -> LayerState {
        LayerState::Dropout {
            features: self.features,
            rate: self.dropout_rate,
            seed: self.seed,
        }
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}
