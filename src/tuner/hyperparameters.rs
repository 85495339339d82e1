//! Hyperparameter container shared by the model builder and the oracle
//!
//! A model builder asks for values by name and domain (`hp.int(...)`);
//! the first request registers the domain. Values the oracle has not set
//! yet resolve to the domain default.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A concrete hyperparameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(v) => *v as f64,
            Value::Float(v) => *v,
        }
    }
}

/// Set of values a hyperparameter may take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Domain {
    /// `min, min + step, ..., max`
    Int { min: i64, max: i64, step: i64 },
    /// Grid when `step` is set, continuous range otherwise
    Float {
        min: f64,
        max: f64,
        step: Option<f64>,
    },
    Choice { values: Vec<f64> },
}

impl Domain {
    fn validate(&self, name: &str) -> Result<()> {
        match self {
            Domain::Int { min, max, step } => {
                if min > max || *step <= 0 {
                    return Err(Error::invalid_hp(name, format!("bad int range {min}..={max} step {step}")));
                }
            }
            Domain::Float { min, max, step } => {
                if !(min.is_finite() && max.is_finite()) || min > max || step.is_some_and(|s| s <= 0.0) {
                    return Err(Error::invalid_hp(name, format!("bad float range {min}..={max}")));
                }
            }
            Domain::Choice { values } => {
                if values.is_empty() {
                    return Err(Error::invalid_hp(name, "empty choice list"));
                }
            }
        }
        Ok(())
    }

    /// Number of grid points, `None` for a continuous range
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            Domain::Int { min, max, step } => Some(((max - min) / step) as usize + 1),
            Domain::Float {
                min,
                max,
                step: Some(step),
            } => Some(((max - min) / step + 1e-9).floor() as usize + 1),
            Domain::Float { step: None, .. } => None,
            Domain::Choice { values } => Some(values.len()),
        }
    }

    pub fn default_value(&self) -> Value {
        match self {
            Domain::Int { min, .. } => Value::Int(*min),
            Domain::Float { min, .. } => Value::Float(*min),
            Domain::Choice { values } => Value::Float(values[0]),
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        match (self, value) {
            (Domain::Int { min, max, step }, Value::Int(v)) => v >= min && v <= max && (v - min) % step == 0,
            (Domain::Float { min, max, step }, v) => {
                let v = v.as_f64();
                let in_range = v >= min - 1e-9 && v <= max + 1e-9;
                match step {
                    Some(step) => {
                        let k = (v - min) / step;
                        in_range && (k - k.round()).abs() < 1e-6
                    }
                    None => in_range,
                }
            }
            (Domain::Choice { values }, v) => {
                let v = v.as_f64();
                values.iter().any(|c| (c - v).abs() <= 1e-12 * c.abs().max(1.0))
            }
            _ => false,
        }
    }

    /// Maps a value to the middle of its cell in `[0, 1]`
    pub fn to_unit(&self, value: &Value) -> f64 {
        let v = value.as_f64();
        match self {
            Domain::Int { min, step, .. } => self.grid_unit(((v - *min as f64) / *step as f64).round()),
            Domain::Float {
                min,
                step: Some(step),
                ..
            } => self.grid_unit(((v - min) / step).round()),
            Domain::Float {
                min,
                max,
                step: None,
            } => {
                if max > min {
                    ((v - min) / (max - min)).clamp(0.0, 1.0)
                } else {
                    0.5
                }
            }
            Domain::Choice { values } => {
                let idx = values
                    .iter()
                    .enumerate()
                    .min_by(|a, b| (a.1 - v).abs().total_cmp(&(b.1 - v).abs()))
                    .map_or(0, |(i, _)| i);
                self.grid_unit(idx as f64)
            }
        }
    }

    fn grid_unit(&self, index: f64) -> f64 {
        let n = self.cardinality().unwrap_or(1) as f64;
        ((index.max(0.0) + 0.5) / n).clamp(0.0, 1.0)
    }

    /// Inverse of [`Domain::to_unit`]; every `u` in `[0, 1]` lands on a legal value
    pub fn from_unit(&self, u: f64) -> Value {
        let u = u.clamp(0.0, 1.0);
        let index = |n: usize| ((u * n as f64).floor() as usize).min(n - 1);
        match self {
            Domain::Int { min, step, .. } => {
                let n = self.cardinality().unwrap_or(1);
                Value::Int(min + index(n) as i64 * step)
            }
            Domain::Float {
                min,
                max,
                step: Some(step),
            } => {
                let n = self.cardinality().unwrap_or(1);
                let v = (min + index(n) as f64 * step).min(*max);
                Value::Float((v * 1e10).round() / 1e10)
            }
            Domain::Float {
                min,
                max,
                step: None,
            } => Value::Float(min + u * (max - min)),
            Domain::Choice { values } => Value::Float(values[index(values.len())]),
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Value {
        self.from_unit(rng.random::<f64>())
    }
}

/// A named domain, in registration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParameter {
    pub name: String,
    pub domain: Domain,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperParameters {
    space: Vec<HyperParameter>,
    values: BTreeMap<String, Value>,
}

impl HyperParameters {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, name: &str, domain: Domain) -> Result<Value> {
        domain.validate(name)?;
        match self.space.iter().find(|hp| hp.name == name) {
            Some(existing) if existing.domain != domain => {
                return Err(Error::invalid_hp(name, "registered twice with different domains"));
            }
            Some(_) => {}
            None => self.space.push(HyperParameter {
                name: name.to_string(),
                domain: domain.clone(),
            }),
        }
        match self.values.get(name) {
            Some(value) if domain.contains(value) => Ok(*value),
            Some(value) => Err(Error::invalid_hp(name, format!("value {value:?} outside {domain:?}"))),
            None => {
                let value = domain.default_value();
                self.values.insert(name.to_string(), value);
                Ok(value)
            }
        }
    }

    pub fn int(&mut self, name: &str, min: i64, max: i64, step: i64) -> Result<i64> {
        match self.register(name, Domain::Int { min, max, step })? {
            Value::Int(v) => Ok(v),
            Value::Float(v) => Err(Error::invalid_hp(name, format!("expected an integer, got {v}"))),
        }
    }

    pub fn float(&mut self, name: &str, min: f64, max: f64, step: Option<f64>) -> Result<f64> {
        Ok(self.register(name, Domain::Float { min, max, step })?.as_f64())
    }

    pub fn choice(&mut self, name: &str, values: &[f64]) -> Result<f64> {
        Ok(self
            .register(
                name,
                Domain::Choice {
                    values: values.to_vec(),
                },
            )?
            .as_f64())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).copied()
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn space(&self) -> &[HyperParameter] {
        &self.space
    }

    /// Sets a value, checking it against the registered domain when there is one
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        if let Some(hp) = self.space.iter().find(|hp| hp.name == name) {
            if !hp.domain.contains(&value) {
                return Err(Error::invalid_hp(name, format!("value {value:?} outside {:?}", hp.domain)));
            }
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Adds the domains (with their values) that `other` registered and this one lacks
    pub fn merge_space(&mut self, other: &HyperParameters) {
        for hp in &other.space {
            if !self.space.iter().any(|own| own.name == hp.name) {
                self.space.push(hp.clone());
                let value = other.get(&hp.name).unwrap_or_else(|| hp.domain.default_value());
                self.values.insert(hp.name.clone(), value);
            }
        }
    }

    /// Same space, different values
    pub fn with_values(&self, values: BTreeMap<String, Value>) -> HyperParameters {
        HyperParameters {
            space: self.space.clone(),
            values,
        }
    }

    /// Position in the unit cube of `space`; names missing here take their default
    pub fn encode(&self, space: &[HyperParameter]) -> Vec<f64> {
        space
            .iter()
            .map(|hp| {
                let value = self.get(&hp.name).unwrap_or_else(|| hp.domain.default_value());
                hp.domain.to_unit(&value)
            })
            .collect()
    }

    pub fn decode(space: &[HyperParameter], point: &[f64]) -> BTreeMap<String, Value> {
        space
            .iter()
            .zip(point)
            .map(|(hp, &u)| (hp.name.clone(), hp.domain.from_unit(u)))
            .collect()
    }
}
