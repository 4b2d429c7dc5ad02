//! Compute pipelines for the GPU backend
//!
//! All kernels are compiled once per device when the backend is created.
//! Bind group layouts are derived from the shaders themselves.

/// Matmul tile edge; the shader runs 16x16 workgroups
pub const MATMUL_TILE: u32 = 16;

/// Invocations per conv2d workgroup
pub const CONV_WORKGROUP_SIZE: u32 = 64;

/// Elements folded by one reduce_sum workgroup (256 invocations, 2 each)
pub const REDUCE_CHUNK: u32 = 512;

/// Invocations per random_normal workgroup, one element each
pub const RANDOM_WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MatmulParams {
    pub m: u32,
    pub k: u32,
    pub n: u32,
    pub _padding: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Conv2dParams {
    pub batch: u32,
    pub in_h: u32,
    pub in_w: u32,
    pub in_c: u32,
    pub out_h: u32,
    pub out_w: u32,
    pub out_c: u32,
    pub kernel_h: u32,
    pub kernel_w: u32,
    pub stride_h: u32,
    pub stride_w: u32,
    pub pad_top: u32,
    pub pad_left: u32,
    pub total: u32,
    pub _padding: [u32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ReduceParams {
    pub len: u32,
    pub _padding: [u32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RandomParams {
    pub len: u32,
    pub seed_lo: u32,
    pub seed_hi: u32,
    pub _padding: u32,
}

/// Compiled kernels for one device
pub struct KernelPipelines {
    pub matmul: wgpu::ComputePipeline,
    pub conv2d: wgpu::ComputePipeline,
    pub reduce_sum: wgpu::ComputePipeline,
    pub random_normal: wgpu::ComputePipeline,
}

impl KernelPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        let matmul = Self::create(
            device,
            "Matmul",
            include_str!("../shaders/matmul.wgsl"),
            "matmul",
        );
        let conv2d = Self::create(
            device,
            "Conv2d",
            include_str!("../shaders/conv2d.wgsl"),
            "conv2d",
        );
        let reduce_sum = Self::create(
            device,
            "Reduce Sum",
            include_str!("../shaders/reduce_sum.wgsl"),
            "reduce_sum",
        );
        let random_normal = Self::create(
            device,
            "Random Normal",
            include_str!("../shaders/random_normal.wgsl"),
            "random_normal",
        );

        log::debug!("[KernelPipelines] Compiled matmul, conv2d, reduce_sum and random_normal pipelines");

        Self {
            matmul,
            conv2d,
            reduce_sum,
            random_normal,
        }
    }

    fn create(
        device: &wgpu::Device,
        label: &str,
        source: &str,
        entry_point: &str,
    ) -> wgpu::ComputePipeline {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: None,
            module: &module,
            entry_point,
        })
    }
}

/// Split `groups` workgroups into an (x, y) grid that respects the
/// per-dimension dispatch limit. Shaders rebuild the flat index as
/// `y * num_workgroups.x + x`, so any surplus groups in the last row must be
/// bounds-checked by the kernel.
pub fn workgroup_grid(groups: u32, max_per_dimension: u32) -> (u32, u32) {
    if groups <= max_per_dimension {
        (groups.max(1), 1)
    } else {
        (max_per_dimension, groups.div_ceil(max_per_dimension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_are_uniform_sized() {
        assert_eq!(std::mem::size_of::<MatmulParams>() % 16, 0);
        assert_eq!(std::mem::size_of::<Conv2dParams>(), 64);
        assert_eq!(std::mem::size_of::<ReduceParams>(), 16);
        assert_eq!(std::mem::size_of::<RandomParams>(), 16);
    }

    #[test]
    fn test_workgroup_grid_small_stays_flat() {
        assert_eq!(workgroup_grid(13, 65535), (13, 1));
        assert_eq!(workgroup_grid(0, 65535), (1, 1));
    }

    #[test]
    fn test_workgroup_grid_folds_large_dispatch() {
        // Full-size conv output: 100 * 94 * 94 * 32 elements
        let groups = (100u32 * 94 * 94 * 32).div_ceil(CONV_WORKGROUP_SIZE);
        let (x, y) = workgroup_grid(groups, 65535);
        assert_eq!(x, 65535);
        assert!(x as u64 * y as u64 >= groups as u64);
        assert!(y <= 65535);
    }
}
