//! Search space for the feedforward classifier and the builder that turns
//! a hyperparameter sample into a compiled model.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::activation::ActivationType;
use crate::error::{Error, Result};
use crate::layers::{ActivationLayer, BatchNormLayer, DenseLayer, DropoutLayer, WeightInit};
use crate::loss::Loss;
use crate::model::Model;
use crate::optimizer::Optimizer;
use crate::tuner::{HyperModel, HyperParameters};

/// Bounds of the searched hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpace {
    pub min_layers: i64,
    pub max_layers: i64,
    pub min_units: i64,
    pub max_units: i64,
    pub units_step: i64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub rate_step: f64,
    pub learning_rates: Vec<f64>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        SearchSpace {
            min_layers: 1,
            max_layers: 10,
            min_units: 64,
            max_units: 1024,
            units_step: 64,
            min_rate: 0.0,
            max_rate: 0.75,
            rate_step: 0.05,
            learning_rates: vec![1e-2, 1e-3, 1e-4],
        }
    }
}

impl SearchSpace {
    pub fn validate(&self) -> Result<()> {
        if self.min_layers < 1 || self.min_layers > self.max_layers {
            return Err(Error::Config(format!(
                "layer range {}..={} must start at 1 or more",
                self.min_layers, self.max_layers
            )));
        }
        if self.min_units < 1 || self.min_units > self.max_units || self.units_step < 1 {
            return Err(Error::Config(format!(
                "unit range {}..={} step {} is empty",
                self.min_units, self.max_units, self.units_step
            )));
        }
        if self.min_rate < 0.0 || self.max_rate >= 1.0 || self.min_rate > self.max_rate || self.rate_step <= 0.0 {
            return Err(Error::Config(format!(
                "dropout range {}..={} must lie in [0, 1)",
                self.min_rate, self.max_rate
            )));
        }
        if self.learning_rates.is_empty() || self.learning_rates.iter().any(|lr| lr.is_nan() || *lr <= 0.0) {
            return Err(Error::Config("learning rates must be positive and non-empty".to_string()));
        }
        Ok(())
    }
}

/// Stack of `Dense -> BatchNorm -> ReLU -> Dropout` blocks topped by a softmax layer
#[derive(Debug, Clone)]
pub struct DenseHyperModel {
    pub input_dim: usize,
    pub num_classes: usize,
    pub space: SearchSpace,
    pub seed: u64,
}

impl DenseHyperModel {
    pub fn new(input_dim: usize, num_classes: usize, space: SearchSpace, seed: u64) -> Self {
        DenseHyperModel {
            input_dim,
            num_classes,
            space,
            seed,
        }
    }
}

impl HyperModel for DenseHyperModel {
    fn build(&self, hp: &mut HyperParameters) -> Result<Model> {
        let space = &self.space;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut model = Model::new(self.input_dim);

        let num_layers = hp.int("num_layers", space.min_layers, space.max_layers, 1)?;
        let mut width = self.input_dim;
        for i in 0..num_layers {
            let units = hp.int(&format!("units_{i}"), space.min_units, space.max_units, space.units_step)?;
            let rate = hp.float(&format!("rate_{i}"), space.min_rate, space.max_rate, Some(space.rate_step))?;
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::invalid_hp(&format!("rate_{i}"), format!("{rate} is not in [0, 1)")));
            }
            let units = units as usize;
            model.add(Box::new(DenseLayer::new(
                width,
                units,
                ActivationType::Linear,
                WeightInit::GlorotUniform,
                &mut rng,
            )))?;
            model.add(Box::new(BatchNormLayer::new(units)))?;
            model.add(Box::new(ActivationLayer::new(units, ActivationType::ReLU)))?;
            model.add(Box::new(DropoutLayer::new(
                units,
                rate as f32,
                self.seed.wrapping_add(i as u64 + 1),
            )))?;
            width = units;
        }
        model.add(Box::new(DenseLayer::new(
            width,
            self.num_classes,
            ActivationType::Softmax,
            WeightInit::GlorotUniform,
            &mut rng,
        )))?;

        let learning_rate = hp.choice("learning_rate", &space.learning_rates)?;
        model.compile(
            Optimizer::adam(learning_rate as f32),
            Loss::SparseCategoricalCrossEntropy,
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuner::Value;
    use proptest::prelude::*;

    #[test]
    fn test_default_build_registers_space() {
        let builder = DenseHyperModel::new(11, 4, SearchSpace::default(), 0);
        let mut hp = HyperParameters::new();
        let model = builder.build(&mut hp).unwrap();
        let names: Vec<&str> = hp.space().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["num_layers", "units_0", "rate_0", "learning_rate"]);
        // one block of four layers plus the output layer
        assert_eq!(model.layers.len(), 5);
        assert_eq!(model.learning_rate(), Some(1e-2));
    }

    #[test]
    fn test_rejects_out_of_bounds_values() {
        let builder = DenseHyperModel::new(11, 3, SearchSpace::default(), 0);
        let mut hp = HyperParameters::new();
        hp.set("num_layers", Value::Int(11)).unwrap();
        assert!(matches!(
            builder.build(&mut hp),
            Err(Error::InvalidHyperparameter { .. })
        ));

        let mut hp = HyperParameters::new();
        hp.set("units_0", Value::Int(100)).unwrap();
        assert!(builder.build(&mut hp).is_err());
    }

    #[test]
    fn test_builds_are_reproducible() {
        let builder = DenseHyperModel::new(5, 2, SearchSpace::default(), 9);
        let a = builder.build(&mut HyperParameters::new()).unwrap();
        let b = builder.build(&mut HyperParameters::new()).unwrap();
        assert_eq!(a.layers[0].state(), b.layers[0].state());
    }

    #[test]
    fn test_largest_configuration() {
        let builder = DenseHyperModel::new(11, 4, SearchSpace::default(), 3);
        let mut hp = HyperParameters::new();
        hp.set("num_layers", Value::Int(10)).unwrap();
        for i in 0..10 {
            hp.set(&format!("units_{i}"), Value::Int(1024)).unwrap();
            hp.set(&format!("rate_{i}"), Value::Float(0.75)).unwrap();
        }
        hp.set("learning_rate", Value::Float(1e-4)).unwrap();

        let model = builder.build(&mut hp).unwrap();
        assert_eq!(model.layers.len(), 41);
        assert_eq!(model.input_dim(), 11);
        assert_eq!(model.output_dim(), 4);
        assert_eq!(hp.get("units_9"), Some(Value::Int(1024)));
        assert_eq!(model.learning_rate(), Some(1e-4));
    }

    #[test]
    fn test_space_validation() {
        assert!(SearchSpace::default().validate().is_ok());
        let bad = SearchSpace {
            max_rate: 1.0,
            ..SearchSpace::default()
        };
        assert!(bad.validate().is_err());
        let bad = SearchSpace {
            learning_rates: vec![],
            ..SearchSpace::default()
        };
        assert!(bad.validate().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_any_sample_matches_data_widths(
            layers in 1i64..=10,
            units in proptest::collection::vec(1i64..=16, 10),
            rates in proptest::collection::vec(0u32..=15, 10),
            lr in 0usize..3,
            classes in 2usize..6,
        ) {
            let space = SearchSpace::default();
            let builder = DenseHyperModel::new(11, classes, space.clone(), 1);
            let mut hp = HyperParameters::new();
            hp.set("num_layers", Value::Int(layers)).unwrap();
            for i in 0..10 {
                hp.set(&format!("units_{i}"), Value::Int(units[i] * 64)).unwrap();
                hp.set(&format!("rate_{i}"), Value::Float(rates[i] as f64 * 0.05)).unwrap();
            }
            hp.set("learning_rate", Value::Float(space.learning_rates[lr])).unwrap();

            let model = builder.build(&mut hp).unwrap();
            prop_assert_eq!(model.input_dim(), 11);
            prop_assert_eq!(model.output_dim(), classes);
            prop_assert!(model.is_compiled());
            prop_assert_eq!(model.layers.len(), layers as usize * 4 + 1);
        }
    }
}
