use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Metric values reported for one epoch, keyed by name
pub type Logs = BTreeMap<String, f64>;

/// Per-epoch metric series collected during `Model::fit`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<usize>,
    pub metrics: BTreeMap<String, Vec<f64>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, epoch: usize, logs: &Logs) {
        self.epochs.push(epoch);
        for (name, &value) in logs {
            self.metrics.entry(name.clone()).or_default().push(value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Last recorded value of a metric
    pub fn last(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|values| values.last().copied())
    }
}

/// Renders as a mapping literal, `{'accuracy': [0.5, 0.75], 'loss': [...]}`
impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, values)) in self.metrics.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{name}': [")?;
            for (j, value) in values.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{value:?}")?;
            }
            write!(f, "]")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        let mut history = History::new();
        let mut logs = Logs::new();
        logs.insert("loss".to_string(), 0.5);
        logs.insert("val_f1".to_string(), 0.25);
        history.record(0, &logs);
        logs.insert("loss".to_string(), 0.375);
        history.record(1, &logs);

        assert_eq!(history.len(), 2);
        assert_eq!(history.get("loss"), Some(&[0.5, 0.375][..]));
        assert_eq!(history.last("val_f1"), Some(0.25));
        assert_eq!(
            history.to_string(),
            "{'loss': [0.5, 0.375], 'val_f1': [0.25, 0.25]}"
        );
    }
}
