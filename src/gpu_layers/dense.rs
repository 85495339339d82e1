use wgpu::{self, Adapter, ComputePipeline, Device, PipelineCompilationOptions, Queue};

use crate::error::{Error, Result};

const WORKGROUP_SIZE: u32 = 8;

/// Matrix product kernel for dense layers on a single wgpu adapter.
///
/// Buffer allocations are bounded by `memory_limit` bytes; callers check
/// [`DenseGPU::fits`] before dispatching.
pub struct DenseGPU {
    device: Device,
    queue: Queue,
    pipeline: ComputePipeline,
    memory_limit: u64,
    adapter_name: String,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MatMulParams {
    pub rows: u32,
    pub inner: u32,
    pub cols: u32,
    pub _pad: u32,
}

impl DenseGPU {
    /// Opens adapter number `adapter_index` with storage limits capped at `memory_limit` bytes
    pub async fn new(adapter_index: usize, memory_limit: u64) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapters: Vec<Adapter> = instance.enumerate_adapters(wgpu::Backends::all());
        let found = adapters.len();
        let adapter = adapters.into_iter().nth(adapter_index).ok_or_else(|| {
            Error::Device(format!(
                "adapter {adapter_index} requested, {found} available"
            ))
        })?;
        let info = adapter.get_info();

        let adapter_limits = adapter.limits();
        let required_limits = wgpu::Limits {
            max_buffer_size: adapter_limits.max_buffer_size.min(memory_limit),
            max_storage_buffer_binding_size: adapter_limits
                .max_storage_buffer_binding_size
                .min(u32::try_from(memory_limit).unwrap_or(u32::MAX)),
            ..adapter_limits
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Dense Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| Error::Device(e.to_string()))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Dense Shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                "dense_shader.wgsl"
            ))),
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Dense Pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("matmul_main"),
            compilation_options: PipelineCompilationOptions::default(),
            cache: None,
        });

        Ok(DenseGPU {
            device,
            queue,
            pipeline,
            memory_limit,
            adapter_name: format!("{} ({:?})", info.name, info.backend),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    /// Whether a `rows × inner` by `inner × cols` product fits under the memory ceiling.
    /// Counts the three storage buffers plus the read-back staging buffer.
    pub fn fits(&self, rows: usize, inner: usize, cols: usize) -> bool {
        let floats = rows * inner + inner * cols + 2 * rows * cols;
        let bytes = (floats * std::mem::size_of::<f32>()) as u64;
        let dispatch_ok = rows.div_ceil(WORKGROUP_SIZE as usize) <= u16::MAX as usize
            && cols.div_ceil(WORKGROUP_SIZE as usize) <= u16::MAX as usize;
        rows * inner * cols > 0 && bytes <= self.memory_limit && dispatch_ok
    }

    /// Computes `lhs (rows × inner) · rhs (inner × cols)`, both row-major
    pub async fn matmul(
        &self,
        lhs: &[f32],
        rhs: &[f32],
        params: MatMulParams,
    ) -> Result<Vec<f32>> {
        let output_len = (params.rows * params.cols) as usize;
        let output_size = (output_len * std::mem::size_of::<f32>()) as u64;

        let lhs_buffer = self.storage_buffer("Lhs Buffer", lhs);
        let rhs_buffer = self.storage_buffer("Rhs Buffer", rhs);

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Params Buffer"),
            size: std::mem::size_of::<MatMulParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Dense Bind Group"),
            layout: &self.pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: lhs_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: rhs_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Dense Encoder"),
            });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Dense Pass"),
                timestamp_writes: None,
            });

            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(
                params.cols.div_ceil(WORKGROUP_SIZE),
                params.rows.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Staging Buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_size);
        self.queue.submit(Some(encoder.finish()));

        let output_slice = staging_buffer.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        output_slice.map_async(wgpu::MapMode::Read, move |result| {
            // Receiver outlives the poll below, a failed send only means it was dropped
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.receive()
            .await
            .ok_or_else(|| Error::Device("map callback dropped".to_string()))?
            .map_err(|e| Error::Device(e.to_string()))?;

        let data = output_slice.get_mapped_range();
        let result = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging_buffer.unmap();

        Ok(result)
    }

    fn storage_buffer(&self, label: &str, data: &[f32]) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of_val(data) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(data));
        buffer
    }
}

impl std::fmt::Debug for DenseGPU {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseGPU")
            .field("adapter", &self.adapter_name)
            .field("memory_limit", &self.memory_limit)
            .finish()
    }
}
