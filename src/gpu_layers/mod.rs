pub mod dense;

pub use dense::{DenseGPU, MatMulParams};
