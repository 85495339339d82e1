//! Compute device selection.
//!
//! Dense matrix products run either on the CPU through ndarray or on a
//! single wgpu adapter whose buffers are capped at a memory ceiling.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gpu_layers::{DenseGPU, MatMulParams};

/// Which device the run asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
    /// GPU when an adapter can be opened, CPU otherwise
    #[default]
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    /// Index into the adapters wgpu enumerates
    pub gpu_index: usize,
    pub memory_limit_mb: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            kind: DeviceKind::Auto,
            gpu_index: 0,
            memory_limit_mb: 1024,
        }
    }
}

impl DeviceConfig {
    /// Memory ceiling in bytes, saturating for absurdly large settings
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Default)]
pub enum Device {
    #[default]
    Cpu,
    Gpu(Arc<DenseGPU>),
}

impl Device {
    pub fn open(config: &DeviceConfig) -> Result<Device> {
        let limit = config.memory_limit_bytes();
        match config.kind {
            DeviceKind::Cpu => Ok(Device::Cpu),
            DeviceKind::Gpu => {
                let gpu = pollster::block_on(DenseGPU::new(config.gpu_index, limit))?;
                info!(adapter = gpu.adapter_name(), memory_limit_mb = config.memory_limit_mb, "GPU device opened");
                Ok(Device::Gpu(Arc::new(gpu)))
            }
            DeviceKind::Auto => match pollster::block_on(DenseGPU::new(config.gpu_index, limit)) {
                Ok(gpu) => {
                    info!(adapter = gpu.adapter_name(), memory_limit_mb = config.memory_limit_mb, "GPU device opened");
                    Ok(Device::Gpu(Arc::new(gpu)))
                }
                Err(e) => {
                    warn!(error = %e, "no usable GPU, falling back to CPU");
                    Ok(Device::Cpu)
                }
            },
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, Device::Gpu(_))
    }

    pub fn describe(&self) -> String {
        match self {
            Device::Cpu => "cpu".to_string(),
            Device::Gpu(gpu) => gpu.adapter_name().to_string(),
        }
    }

    /// `a · b`. Products that do not fit the GPU ceiling, or fail on the GPU, run on the CPU.
    pub fn matmul(&self, a: ArrayView2<f32>, b: ArrayView2<f32>) -> Array2<f32> {
        match self {
            Device::Cpu => a.dot(&b),
            Device::Gpu(gpu) => {
                let (rows, inner) = a.dim();
                let cols = b.ncols();
                if !gpu.fits(rows, inner, cols) {
                    debug!(rows, inner, cols, "matmul exceeds GPU ceiling, using CPU");
                    return a.dot(&b);
                }
                match gpu_matmul(gpu, a, b) {
                    Ok(out) => out,
                    Err(e) => {
                        warn!(error = %e, "GPU matmul failed, using CPU");
                        a.dot(&b)
                    }
                }
            }
        }
    }
}

fn gpu_matmul(gpu: &DenseGPU, a: ArrayView2<f32>, b: ArrayView2<f32>) -> Result<Array2<f32>> {
    let (rows, inner) = a.dim();
    let cols = b.ncols();
    let lhs = a.as_standard_layout();
    let rhs = b.as_standard_layout();
    let (Some(lhs), Some(rhs)) = (lhs.as_slice(), rhs.as_slice()) else {
        return Err(Error::Device("non-contiguous operand".to_string()));
    };
    let params = MatMulParams {
        rows: rows as u32,
        inner: inner as u32,
        cols: cols as u32,
        _pad: 0,
    };
    let data = pollster::block_on(gpu.matmul(lhs, rhs, params))?;
    Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Shape(e.to_string()))
}
