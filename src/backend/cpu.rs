//! Host backend
//!
//! Buffers are plain host tensors, so uploading is a copy and materializing
//! is a clone. Kernels split their output across the rayon pool.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use super::{check_conv_operands, matmul_dims, BackendInfo, ComputeBackend, ExecutionMode};
use crate::device::DeviceKind;
use crate::error::{BenchError, BenchResult};
use crate::layers::Conv2dGeometry;
use crate::tensor::{Shape, Tensor};

pub struct CpuBackend {
    info: BackendInfo,
}

impl CpuBackend {
    pub fn new(index: usize) -> Self {
        let threads = rayon::current_num_threads();
        log::debug!("[CpuBackend] Using {} worker threads", threads);

        Self {
            info: BackendInfo {
                kind: DeviceKind::Cpu,
                index,
                name: format!("/device:CPU:{}", index),
                description: format!(
                    "host CPU ({} logical cores, {} physical, {} worker threads)",
                    num_cpus::get(),
                    num_cpus::get_physical(),
                    threads
                ),
            },
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ComputeBackend for CpuBackend {
    type Buffer = Tensor;

    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Eager
    }

    fn set_execution_mode(&self, mode: ExecutionMode) -> BenchResult<()> {
        if mode == ExecutionMode::Batched {
            log::debug!("[CpuBackend] Batched execution requested; host work always runs eagerly");
        }
        Ok(())
    }

    fn upload(&self, tensor: &Tensor) -> BenchResult<Tensor> {
        Ok(tensor.clone())
    }

    fn random_normal(&self, shape: Shape, seed: u64) -> BenchResult<Tensor> {
        Ok(Tensor::random_normal(shape, &mut StdRng::seed_from_u64(seed)))
    }

    fn matmul(&self, a: &Tensor, b: &Tensor) -> BenchResult<Tensor> {
        let (m, k, n) = matmul_dims(a.shape(), b.shape())?;
        let lhs = a.data();
        let rhs = b.data();
        let mut out = vec![0.0f32; m * n];

        // i-k-j order keeps the inner loop streaming over contiguous rows of b
        out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            let lhs_row = &lhs[i * k..(i + 1) * k];
            for (p, &lhs_ip) in lhs_row.iter().enumerate() {
                let rhs_row = &rhs[p * n..(p + 1) * n];
                for (acc, &r) in row.iter_mut().zip(rhs_row) {
                    *acc += lhs_ip * r;
                }
            }
        });

        Tensor::from_vec([m, n], out)
    }

    fn conv2d(
        &self,
        input: &Tensor,
        kernel: &Tensor,
        bias: &Tensor,
        geometry: &Conv2dGeometry,
    ) -> BenchResult<Tensor> {
        check_conv_operands(input.shape(), kernel.shape(), bias.shape(), geometry)?;

        let g = geometry;
        let src = input.data();
        let weights = kernel.data();
        let bias = bias.data();
        let mut out = vec![0.0f32; g.output_len()];

        out.par_chunks_mut(g.out_w * g.out_c)
            .enumerate()
            .for_each(|(row_idx, row)| {
                let b = row_idx / g.out_h;
                let oy = row_idx % g.out_h;

                for ox in 0..g.out_w {
                    let acc = &mut row[ox * g.out_c..(ox + 1) * g.out_c];
                    acc.copy_from_slice(bias);

                    for ky in 0..g.kernel_h {
                        let iy = (oy * g.stride_h + ky) as isize - g.pad_top as isize;
                        if iy < 0 || iy >= g.in_h as isize {
                            continue;
                        }
                        for kx in 0..g.kernel_w {
                            let ix = (ox * g.stride_w + kx) as isize - g.pad_left as isize;
                            if ix < 0 || ix >= g.in_w as isize {
                                continue;
                            }
                            let in_base =
                                ((b * g.in_h + iy as usize) * g.in_w + ix as usize) * g.in_c;
                            let w_base = (ky * g.kernel_w + kx) * g.in_c * g.out_c;

                            for ci in 0..g.in_c {
                                let value = src[in_base + ci];
                                let w_row = &weights[w_base + ci * g.out_c..w_base + (ci + 1) * g.out_c];
                                for (a, &w) in acc.iter_mut().zip(w_row) {
                                    *a += value * w;
                                }
                            }
                        }
                    }
                }
            });

        Tensor::from_vec(g.output_shape(), out)
    }

    fn reduce_sum(&self, input: &Tensor) -> BenchResult<Tensor> {
        if input.shape().is_empty() {
            return Err(BenchError::InvalidShape {
                shape: input.shape().to_string(),
                reason: "cannot reduce an empty tensor".to_string(),
            });
        }
        let total: f32 = input.data().par_iter().sum();
        Ok(Tensor::scalar(total))
    }

    fn synchronize(&self) -> BenchResult<()> {
        Ok(())
    }

    fn materialize(&self, buffer: &Tensor) -> BenchResult<Tensor> {
        Ok(buffer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Conv2dConfig, Padding};

    #[test]
    fn test_matmul_small() {
        let backend = CpuBackend::default();
        let a = Tensor::from_vec([2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Tensor::from_vec([3, 2], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();

        let c = backend.matmul(&a, &b).unwrap();
        assert_eq!(c.shape().dims(), &[2, 2]);
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_identity() {
        let backend = CpuBackend::default();
        let mut eye = vec![0.0; 9];
        for i in 0..3 {
            eye[i * 3 + i] = 1.0;
        }
        let eye = Tensor::from_vec([3, 3], eye).unwrap();
        let x = Tensor::from_vec([3, 3], (0..9).map(|v| v as f32).collect()).unwrap();

        assert_eq!(backend.matmul(&x, &eye).unwrap(), x);
    }

    #[test]
    fn test_conv2d_single_channel_valid() {
        let backend = CpuBackend::default();
        // 1x3x3x1 image, 2x2 kernel of ones, one filter with bias 0.5
        let input = Tensor::from_vec([1, 3, 3, 1], (1..=9).map(|v| v as f32).collect()).unwrap();
        let config = Conv2dConfig::new(1, 2);
        let geometry = config.geometry(input.shape()).unwrap();
        let kernel = Tensor::from_vec([2, 2, 1, 1], vec![1.0; 4]).unwrap();
        let bias = Tensor::from_vec([1], vec![0.5]).unwrap();

        let out = backend.conv2d(&input, &kernel, &bias, &geometry).unwrap();
        assert_eq!(out.shape().dims(), &[1, 2, 2, 1]);
        assert_eq!(out.data(), &[12.5, 16.5, 24.5, 28.5]);
    }

    #[test]
    fn test_conv2d_same_padding_keeps_spatial_size() {
        let backend = CpuBackend::default();
        let input = Tensor::from_vec([1, 3, 3, 1], vec![1.0; 9]).unwrap();
        let mut config = Conv2dConfig::new(2, 3);
        config.padding = Padding::Same;
        let geometry = config.geometry(input.shape()).unwrap();
        let kernel = Tensor::from_vec([3, 3, 1, 2], vec![1.0; 18]).unwrap();
        let bias = Tensor::zeros([2]);

        let out = backend.conv2d(&input, &kernel, &bias, &geometry).unwrap();
        assert_eq!(out.shape().dims(), &[1, 3, 3, 2]);
        // Corner sees 4 pixels, edge 6, center 9; both filters identical
        assert_eq!(&out.data()[0..2], &[4.0, 4.0]);
        assert_eq!(&out.data()[2..4], &[6.0, 6.0]);
        assert_eq!(&out.data()[8..10], &[9.0, 9.0]);
    }

    #[test]
    fn test_conv2d_rejects_wrong_kernel() {
        let backend = CpuBackend::default();
        let input = Tensor::zeros([1, 4, 4, 3]);
        let geometry = Conv2dConfig::new(8, 3).geometry(input.shape()).unwrap();
        let kernel = Tensor::zeros([3, 3, 1, 8]);
        let bias = Tensor::zeros([8]);

        let err = backend.conv2d(&input, &kernel, &bias, &geometry).unwrap_err();
        assert!(matches!(err, BenchError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_reduce_sum() {
        let backend = CpuBackend::default();
        let t = Tensor::from_vec([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let total = backend.reduce_sum(&t).unwrap();
        assert_eq!(total.item(), Some(10.0));
    }

    #[test]
    fn test_random_normal_is_seeded() {
        let backend = CpuBackend::default();
        let shape = Shape::new(vec![64, 64]);
        let a = backend.random_normal(shape.clone(), 5).unwrap();
        let b = backend.random_normal(shape.clone(), 5).unwrap();
        let c = backend.random_normal(shape, 6).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.shape().dims(), &[64, 64]);
    }

    #[test]
    fn test_synchronize_is_a_no_op() {
        let backend = CpuBackend::default();
        let x = Tensor::from_vec([1, 1], vec![3.0]).unwrap();
        let y = backend.matmul(&x, &x).unwrap();
        backend.synchronize().unwrap();
        assert_eq!(y.item(), Some(9.0));
    }
}
