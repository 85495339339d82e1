mod activation;
mod error;
mod history;
mod loss;
mod model;
mod optimizer;

pub mod callbacks;
pub mod config;
pub mod data;
pub mod device;
pub mod experiment;
pub mod gpu_layers;
pub mod hypermodel;
pub mod layers;
pub mod metrics;
pub mod tuner;

pub use activation::ActivationType;
pub use error::{Error, Result};
pub use history::{History, Logs};
pub use loss::Loss;
pub use model::{Evaluation, FitOptions, Model};
pub use optimizer::Optimizer;
