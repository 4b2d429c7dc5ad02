//! wgpu backend
//!
//! Operations are encoded as compute passes and handed to the device queue.
//! Submission does not wait for the GPU, so an operation returning here only
//! means the work is queued. `materialize` is the synchronization barrier:
//! it copies the result into a mappable staging buffer and blocks on the map.

use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use super::error::{buffer_mapping_error, buffer_too_large, gpu_operation_error, GpuErrorContext};
use super::pipelines::{
    workgroup_grid, Conv2dParams, KernelPipelines, MatmulParams, RandomParams, ReduceParams,
    CONV_WORKGROUP_SIZE, MATMUL_TILE, RANDOM_WORKGROUP_SIZE, REDUCE_CHUNK,
};
use super::{check_conv_operands, matmul_dims, BackendInfo, ComputeBackend, DeviceBuffer, ExecutionMode};
use crate::device::{DeviceKind, MemoryPolicy};
use crate::error::{BenchError, BenchResult};
use crate::layers::Conv2dGeometry;
use crate::tensor::{Shape, Tensor};

/// Tensor resident in GPU memory
#[derive(Clone)]
pub struct GpuBuffer {
    buffer: Arc<wgpu::Buffer>,
    shape: Shape,
}

impl DeviceBuffer for GpuBuffer {
    fn shape(&self) -> &Shape {
        &self.shape
    }
}

pub struct GpuBackend {
    info: BackendInfo,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: KernelPipelines,
    limits: wgpu::Limits,
    mode: Mutex<ExecutionMode>,
    pending: Mutex<Option<wgpu::CommandEncoder>>,
    // Held for the device's lifetime when memory growth is off
    _reservation: Option<wgpu::Buffer>,
}

impl GpuBackend {
    /// Open a logical device on `adapter`
    pub fn new(
        adapter: &wgpu::Adapter,
        index: usize,
        policy: MemoryPolicy,
        mode: ExecutionMode,
    ) -> BenchResult<Self> {
        let adapter_info = adapter.get_info();
        let limits = adapter.limits();

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Benchmark Device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
            },
            None,
        ))
        .map_err(|e| BenchError::DeviceRequest {
            adapter: adapter_info.name.clone(),
            error: e.to_string(),
        })?;

        device.on_uncaptured_error(Box::new(|error: wgpu::Error| {
            log::error!("[GpuBackend] Uncaptured wgpu error: {}", error);
        }));

        let pipelines = KernelPipelines::new(&device);

        let reservation = match policy {
            MemoryPolicy::Growth => None,
            MemoryPolicy::Reserve { bytes } => {
                let size = bytes.min(limits.max_buffer_size) & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
                if size == 0 {
                    None
                } else {
                    log::info!(
                        "[GpuBackend] Reserving {} MB on {} up front",
                        size / 1024 / 1024,
                        adapter_info.name
                    );
                    Some(device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("Memory Reservation"),
                        size,
                        usage: wgpu::BufferUsages::STORAGE,
                        mapped_at_creation: false,
                    }))
                }
            }
        };

        log::info!(
            "[GpuBackend] Opened {} ({:?}, {:?}) as /device:GPU:{}",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type,
            index
        );

        Ok(Self {
            info: BackendInfo {
                kind: DeviceKind::Gpu,
                index,
                name: format!("/device:GPU:{}", index),
                description: format!(
                    "{} ({:?}, {:?})",
                    adapter_info.name, adapter_info.backend, adapter_info.device_type
                ),
            },
            device: Arc::new(device),
            queue: Arc::new(queue),
            pipelines,
            limits,
            mode: Mutex::new(mode),
            pending: Mutex::new(None),
            _reservation: reservation,
        })
    }

    fn check_binding_size(&self, label: &str, size: u64) -> BenchResult<()> {
        let limit = (self.limits.max_storage_buffer_binding_size as u64).min(self.limits.max_buffer_size);
        if size > limit {
            return Err(buffer_too_large(label, size, limit));
        }
        if size == 0 {
            return Err(gpu_operation_error(label, "zero-sized buffers cannot be bound"));
        }
        Ok(())
    }

    fn storage_buffer(&self, label: &str, shape: Shape) -> BenchResult<GpuBuffer> {
        let size = shape.byte_size();
        self.check_binding_size(label, size)?;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(GpuBuffer {
            buffer: Arc::new(buffer),
            shape,
        })
    }

    fn uniform<T: bytemuck::Pod>(&self, label: &str, params: &T) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    fn bind_group(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        buffers: &[&wgpu::Buffer],
    ) -> wgpu::BindGroup {
        let layout = pipeline.get_bind_group_layout(0);
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &layout,
            entries: &entries,
        })
    }

    fn check_dispatch(&self, label: &str, x: u32, y: u32) -> BenchResult<()> {
        let max = self.limits.max_compute_workgroups_per_dimension;
        if x > max || y > max {
            return Err(gpu_operation_error(
                label,
                format!("dispatch {}x{} exceeds {} workgroups per dimension", x, y, max),
            ));
        }
        Ok(())
    }

    /// Record one compute dispatch, submitting now or deferring per the
    /// current execution mode
    fn dispatch(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        workgroups: (u32, u32),
    ) -> BenchResult<()> {
        self.check_dispatch(label, workgroups.0, workgroups.1)?;

        let encode = |encoder: &mut wgpu::CommandEncoder| {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
        };

        match self.execution_mode() {
            ExecutionMode::Eager => {
                let mut encoder = self.create_encoder(label);
                encode(&mut encoder);
                self.queue.submit(std::iter::once(encoder.finish()));
            }
            ExecutionMode::Batched => {
                let mut pending = self.pending.lock();
                let encoder = pending.get_or_insert_with(|| self.create_encoder("Batched Operations"));
                encode(encoder);
            }
        }

        Ok(())
    }

    fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    /// Submit any batched work that has not reached the queue yet
    fn flush(&self) {
        if let Some(encoder) = self.pending.lock().take() {
            log::trace!("[GpuBackend] Flushing batched command buffer");
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}

impl ComputeBackend for GpuBackend {
    type Buffer = GpuBuffer;

    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn execution_mode(&self) -> ExecutionMode {
        *self.mode.lock()
    }

    fn set_execution_mode(&self, mode: ExecutionMode) -> BenchResult<()> {
        self.flush();
        let mut current = self.mode.lock();
        if *current != mode {
            log::debug!("[GpuBackend] {} execution mode {:?} -> {:?}", self.info.name, *current, mode);
            *current = mode;
        }
        Ok(())
    }

    fn upload(&self, tensor: &Tensor) -> BenchResult<GpuBuffer> {
        let label = "Uploaded Tensor";
        self.check_binding_size(label, tensor.shape().byte_size())?;

        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(tensor.data()),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });

        Ok(GpuBuffer {
            buffer: Arc::new(buffer),
            shape: tensor.shape().clone(),
        })
    }

    fn random_normal(&self, shape: Shape, seed: u64) -> BenchResult<GpuBuffer> {
        let len = u32::try_from(shape.len())
            .gpu_context("random_normal output exceeds u32 indexing")?;
        let output = self.storage_buffer("Random Normal Output", shape)?;

        let params = self.uniform(
            "Random Params",
            &RandomParams {
                len,
                seed_lo: seed as u32,
                seed_hi: (seed >> 32) as u32,
                _padding: 0,
            },
        );
        let bind_group = self.bind_group(
            "Random Normal Bind Group",
            &self.pipelines.random_normal,
            &[&params, &output.buffer],
        );

        let groups = len.div_ceil(RANDOM_WORKGROUP_SIZE);
        let grid = workgroup_grid(groups, self.limits.max_compute_workgroups_per_dimension);
        self.dispatch("Random Normal", &self.pipelines.random_normal, &bind_group, grid)?;

        Ok(output)
    }

    fn matmul(&self, a: &GpuBuffer, b: &GpuBuffer) -> BenchResult<GpuBuffer> {
        let (m, k, n) = matmul_dims(&a.shape, &b.shape)?;
        let output = self.storage_buffer("Matmul Output", Shape::new(vec![m, n]))?;

        let params = self.uniform(
            "Matmul Params",
            &MatmulParams {
                m: m as u32,
                k: k as u32,
                n: n as u32,
                _padding: 0,
            },
        );
        let bind_group = self.bind_group(
            "Matmul Bind Group",
            &self.pipelines.matmul,
            &[&params, &a.buffer, &b.buffer, &output.buffer],
        );

        let workgroups = (
            (n as u32).div_ceil(MATMUL_TILE),
            (m as u32).div_ceil(MATMUL_TILE),
        );
        self.dispatch("Matmul", &self.pipelines.matmul, &bind_group, workgroups)?;

        Ok(output)
    }

    fn conv2d(
        &self,
        input: &GpuBuffer,
        kernel: &GpuBuffer,
        bias: &GpuBuffer,
        geometry: &Conv2dGeometry,
    ) -> BenchResult<GpuBuffer> {
        check_conv_operands(&input.shape, &kernel.shape, &bias.shape, geometry)?;

        let total = u32::try_from(geometry.output_len())
            .gpu_context("conv2d output exceeds u32 indexing")?;
        let output = self.storage_buffer("Conv2d Output", geometry.output_shape())?;

        let g = geometry;
        let params = self.uniform(
            "Conv2d Params",
            &Conv2dParams {
                batch: g.batch as u32,
                in_h: g.in_h as u32,
                in_w: g.in_w as u32,
                in_c: g.in_c as u32,
                out_h: g.out_h as u32,
                out_w: g.out_w as u32,
                out_c: g.out_c as u32,
                kernel_h: g.kernel_h as u32,
                kernel_w: g.kernel_w as u32,
                stride_h: g.stride_h as u32,
                stride_w: g.stride_w as u32,
                pad_top: g.pad_top as u32,
                pad_left: g.pad_left as u32,
                total,
                _padding: [0; 2],
            },
        );
        let bind_group = self.bind_group(
            "Conv2d Bind Group",
            &self.pipelines.conv2d,
            &[&params, &input.buffer, &kernel.buffer, &bias.buffer, &output.buffer],
        );

        let groups = total.div_ceil(CONV_WORKGROUP_SIZE);
        let grid = workgroup_grid(groups, self.limits.max_compute_workgroups_per_dimension);
        self.dispatch("Conv2d", &self.pipelines.conv2d, &bind_group, grid)?;

        Ok(output)
    }

    fn reduce_sum(&self, input: &GpuBuffer) -> BenchResult<GpuBuffer> {
        let mut len = u32::try_from(input.shape.len())
            .gpu_context("reduce_sum input exceeds u32 indexing")?;
        if len == 0 {
            return Err(BenchError::InvalidShape {
                shape: input.shape.to_string(),
                reason: "cannot reduce an empty tensor".to_string(),
            });
        }

        let mut current = input.clone();
        loop {
            let groups = len.div_ceil(REDUCE_CHUNK);
            let partials = self.storage_buffer("Reduce Partials", Shape::new(vec![groups as usize]))?;

            let params = self.uniform(
                "Reduce Params",
                &ReduceParams {
                    len,
                    _padding: [0; 3],
                },
            );
            let bind_group = self.bind_group(
                "Reduce Bind Group",
                &self.pipelines.reduce_sum,
                &[&params, &current.buffer, &partials.buffer],
            );
            let grid = workgroup_grid(groups, self.limits.max_compute_workgroups_per_dimension);
            self.dispatch("Reduce Sum", &self.pipelines.reduce_sum, &bind_group, grid)?;

            current = partials;
            len = groups;
            if len == 1 {
                break;
            }
        }

        Ok(GpuBuffer {
            buffer: current.buffer,
            shape: Shape::scalar(),
        })
    }

    fn synchronize(&self) -> BenchResult<()> {
        self.flush();
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn materialize(&self, buffer: &GpuBuffer) -> BenchResult<Tensor> {
        self.flush();

        let size = buffer.shape.byte_size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.create_encoder("Readback");
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        // Wait for GPU to finish and map buffer
        let buffer_slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result); // Ignore send error if receiver dropped
        });
        self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(rx)
            .map_err(|_| buffer_mapping_error("Readback Staging Buffer"))?
            .gpu_context("map readback buffer")?;

        let data = {
            let view = buffer_slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&view).to_vec()
        };
        staging.unmap();

        Tensor::from_vec(buffer.shape.clone(), data)
    }
}
