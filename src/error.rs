//! Error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading data, training, or searching
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("YAML error")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Column not found in {path}: {column}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("{path} has {found} columns, need at least {needed} feature columns")]
    TooFewColumns {
        path: PathBuf,
        found: usize,
        needed: usize,
    },

    #[error("Cannot parse {value:?} in {path} row {row}, column {column}")]
    Parse {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },

    #[error("Label {0} does not appear in the training table")]
    UnknownLabel(i64),

    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    #[error("Invalid hyperparameter {name}: {reason}")]
    InvalidHyperparameter { name: String, reason: String },

    #[error("Metric not found in epoch logs: {0}")]
    MissingMetric(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Model is not compiled")]
    NotCompiled,

    #[error("Device error: {0}")]
    Device(String),

    #[error("No completed trials")]
    NoTrials,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_hp(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidHyperparameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MissingColumn {
            path: PathBuf::from("train.csv"),
            column: "dloc".to_string(),
        };
        assert!(err.to_string().contains("dloc"));
        assert!(err.to_string().contains("train.csv"));

        let err = Error::invalid_hp("units_0", "must be a multiple of 64");
        assert!(err.to_string().contains("units_0"));

        let err = Error::UnknownLabel(7);
        assert!(err.to_string().contains('7'));

        let err = Error::NoTrials;
        assert_eq!(err.to_string(), "No completed trials");
    }
}
