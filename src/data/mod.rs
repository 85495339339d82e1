//! Tabular data: CSV loading, label encoding, the held-out validation
//! split, feature scaling and class weights.

mod class_weight;
mod labels;
mod scaler;
mod split;
mod table;

use std::collections::BTreeMap;

use ndarray::Array2;
use tracing::info;

pub use class_weight::balanced_class_weights;
pub use labels::LabelEncoder;
pub use scaler::StandardScaler;
pub use split::{train_test_split, Split};
pub use table::Table;

use crate::config::DataConfig;
use crate::error::Result;

/// Scaled train/validation/test partitions ready for fitting
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub x_train: Array2<f32>,
    pub y_train: Vec<usize>,
    pub x_valid: Array2<f32>,
    pub y_valid: Vec<usize>,
    pub x_test: Array2<f32>,
    pub y_test: Vec<usize>,
    pub encoder: LabelEncoder,
    pub scaler: StandardScaler,
}

impl PreparedData {
    pub fn num_features(&self) -> usize {
        self.x_train.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.encoder.num_classes()
    }

    /// Balanced weights from the training partition's label counts
    pub fn class_weights(&self) -> BTreeMap<usize, f32> {
        balanced_class_weights(&self.y_train)
    }
}

/// Loads both tables, splits off the validation rows and scales every
/// partition with statistics from the training rows only.
pub fn prepare(config: &DataConfig) -> Result<PreparedData> {
    let train_table = Table::read(&config.train_path)?;
    let test_table = Table::read(&config.test_path)?;
    info!(
        train_rows = train_table.len(),
        test_rows = test_table.len(),
        target = %config.target,
        "tables loaded"
    );

    let x_train_full = train_table.features(config.feature_count)?;
    let raw_train = train_table.integer_column(&config.target)?;
    let x_test = test_table.features(config.feature_count)?;
    let raw_test = test_table.integer_column(&config.target)?;

    let encoder = LabelEncoder::fit(&raw_train);
    let y_train_full = encoder.transform(&raw_train)?;
    let y_test = encoder.transform(&raw_test)?;

    let split = train_test_split(&x_train_full, &y_train_full, config.validation_size, config.seed)?;

    let scaler = StandardScaler::fit(&split.x_train)?;
    let x_train = scaler.transform(&split.x_train)?;
    let x_valid = scaler.transform(&split.x_test)?;
    let x_test = scaler.transform(&x_test)?;

    info!(
        train = x_train.nrows(),
        valid = x_valid.nrows(),
        test = x_test.nrows(),
        classes = encoder.num_classes(),
        "data prepared"
    );

    Ok(PreparedData {
        x_train,
        y_train: split.y_train,
        x_valid,
        y_valid: split.y_test,
        x_test,
        y_test,
        encoder,
        scaler,
    })
}
