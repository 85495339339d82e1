use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maps raw integer labels onto dense class indices in ascending label order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<i64>,
}

impl LabelEncoder {
    pub fn fit(labels: &[i64]) -> Self {
        let mut classes = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        LabelEncoder { classes }
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn transform(&self, labels: &[i64]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|label| {
                self.classes
                    .binary_search(label)
                    .map_err(|_| Error::UnknownLabel(*label))
            })
            .collect()
    }

    pub fn inverse(&self, index: usize) -> Option<i64> {
        self.classes.get(index).copied()
    }
}
