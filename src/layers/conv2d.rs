//! 2D convolution layer
//!
//! Inputs are NHWC, kernels HWIO, matching the layout most frameworks use
//! for image batches. Weights are Glorot-uniform initialised and the bias
//! starts at zero.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backend::{ComputeBackend, DeviceBuffer};
use crate::error::{BenchError, BenchResult};
use crate::tensor::{Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// No padding; the kernel must fit entirely inside the input
    Valid,
    /// Zero padding so that output size is `ceil(input / stride)`
    Same,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dConfig {
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub strides: (usize, usize),
    pub padding: Padding,
    pub use_bias: bool,
}

impl Conv2dConfig {
    /// Square kernel, unit stride, valid padding, with bias
    pub fn new(filters: usize, kernel_size: usize) -> Self {
        Self {
            filters,
            kernel_size: (kernel_size, kernel_size),
            strides: (1, 1),
            padding: Padding::Valid,
            use_bias: true,
        }
    }

    /// Plan the convolution of an NHWC `input` shape
    pub fn geometry(&self, input: &Shape) -> BenchResult<Conv2dGeometry> {
        let invalid = |reason: String| BenchError::InvalidShape {
            shape: input.to_string(),
            reason,
        };

        let &[batch, in_h, in_w, in_c] = input.dims() else {
            return Err(invalid(format!(
                "conv2d expects a rank-4 NHWC input, got rank {}",
                input.rank()
            )));
        };

        let (kernel_h, kernel_w) = self.kernel_size;
        let (stride_h, stride_w) = self.strides;
        if batch == 0 || in_h == 0 || in_w == 0 || in_c == 0 {
            return Err(invalid("conv2d input must be non-empty".to_string()));
        }
        if self.filters == 0 || kernel_h == 0 || kernel_w == 0 || stride_h == 0 || stride_w == 0 {
            return Err(invalid(format!(
                "filters, kernel size and strides must be positive (filters={}, kernel={}x{}, strides={}x{})",
                self.filters, kernel_h, kernel_w, stride_h, stride_w
            )));
        }

        let (out_h, pad_top) = output_extent(in_h, kernel_h, stride_h, self.padding)
            .ok_or_else(|| invalid(format!("kernel height {} exceeds input height {}", kernel_h, in_h)))?;
        let (out_w, pad_left) = output_extent(in_w, kernel_w, stride_w, self.padding)
            .ok_or_else(|| invalid(format!("kernel width {} exceeds input width {}", kernel_w, in_w)))?;

        Ok(Conv2dGeometry {
            batch,
            in_h,
            in_w,
            in_c,
            out_h,
            out_w,
            out_c: self.filters,
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            pad_top,
            pad_left,
        })
    }
}

/// Output size and leading pad along one spatial axis
fn output_extent(input: usize, kernel: usize, stride: usize, padding: Padding) -> Option<(usize, usize)> {
    match padding {
        Padding::Valid => {
            if kernel > input {
                return None;
            }
            Some(((input - kernel) / stride + 1, 0))
        }
        Padding::Same => {
            let out = input.div_ceil(stride);
            let pad_total = ((out - 1) * stride + kernel).saturating_sub(input);
            Some((out, pad_total / 2))
        }
    }
}

/// Fully resolved convolution dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub batch: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub in_c: usize,
    pub out_h: usize,
    pub out_w: usize,
    pub out_c: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_top: usize,
    pub pad_left: usize,
}

impl Conv2dGeometry {
    pub fn input_shape(&self) -> Shape {
        Shape::new(vec![self.batch, self.in_h, self.in_w, self.in_c])
    }

    pub fn kernel_shape(&self) -> Shape {
        Shape::new(vec![self.kernel_h, self.kernel_w, self.in_c, self.out_c])
    }

    pub fn output_shape(&self) -> Shape {
        Shape::new(vec![self.batch, self.out_h, self.out_w, self.out_c])
    }

    pub fn output_len(&self) -> usize {
        self.batch * self.out_h * self.out_w * self.out_c
    }

    /// Multiply-accumulates for one forward pass, ignoring padding
    pub fn macs(&self) -> u64 {
        self.output_len() as u64 * (self.kernel_h * self.kernel_w * self.in_c) as u64
    }
}

/// A convolution layer with weights held on the host
#[derive(Debug, Clone)]
pub struct Conv2d {
    config: Conv2dConfig,
    in_channels: usize,
    kernel: Tensor,
    bias: Tensor,
}

impl Conv2d {
    /// Create weights for inputs with `in_channels` channels
    pub fn build<R: Rng>(config: Conv2dConfig, in_channels: usize, rng: &mut R) -> Self {
        let (kh, kw) = config.kernel_size;
        let fan_in = kh * kw * in_channels;
        let fan_out = kh * kw * config.filters;
        let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();

        let kernel = Tensor::random_uniform([kh, kw, in_channels, config.filters], -limit, limit, rng);
        let bias = Tensor::zeros([config.filters]);

        Self {
            config,
            in_channels,
            kernel,
            bias,
        }
    }

    /// Replace the weights, e.g. with known values in tests
    pub fn with_weights(config: Conv2dConfig, kernel: Tensor, bias: Tensor) -> BenchResult<Self> {
        let (kh, kw) = config.kernel_size;
        let &[k0, k1, in_channels, filters] = kernel.shape().dims() else {
            return Err(BenchError::InvalidShape {
                shape: kernel.shape().to_string(),
                reason: "conv2d kernel must be rank-4 HWIO".to_string(),
            });
        };
        if (k0, k1, filters) != (kh, kw, config.filters) || bias.shape().dims() != [filters] {
            return Err(BenchError::ShapeMismatch {
                operation: "conv2d weights".to_string(),
                lhs: format!("{} + {}", kernel.shape(), bias.shape()),
                rhs: format!("{}x{}x?x{} + {}", kh, kw, config.filters, config.filters),
            });
        }

        Ok(Self {
            config,
            in_channels,
            kernel,
            bias,
        })
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.config
    }

    pub fn kernel(&self) -> &Tensor {
        &self.kernel
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Run the layer on `backend`. Weights are uploaded to the same device
    /// as `input` on every call.
    pub fn forward<B: ComputeBackend>(&self, backend: &B, input: &B::Buffer) -> BenchResult<B::Buffer> {
        let geometry = self.config.geometry(input.shape())?;
        if geometry.in_c != self.in_channels {
            return Err(BenchError::ShapeMismatch {
                operation: "conv2d input channels".to_string(),
                lhs: input.shape().to_string(),
                rhs: format!("{} channels", self.in_channels),
            });
        }

        let kernel = backend.upload(&self.kernel)?;
        let bias = if self.config.use_bias {
            backend.upload(&self.bias)?
        } else {
            backend.upload(&Tensor::zeros([self.config.filters]))?
        };

        backend.conv2d(input, &kernel, &bias, &geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_benchmark_geometry() {
        let config = Conv2dConfig::new(32, 7);
        let geometry = config.geometry(&Shape::new(vec![100, 100, 100, 3])).unwrap();
        assert_eq!(geometry.output_shape().dims(), &[100, 94, 94, 32]);
        assert_eq!(geometry.kernel_shape().dims(), &[7, 7, 3, 32]);
        assert_eq!(geometry.macs(), 100 * 94 * 94 * 32 * 147);
    }

    #[test]
    fn test_same_padding_with_stride() {
        let mut config = Conv2dConfig::new(4, 3);
        config.padding = Padding::Same;
        config.strides = (2, 2);
        let geometry = config.geometry(&Shape::new(vec![1, 5, 6, 1])).unwrap();
        assert_eq!((geometry.out_h, geometry.out_w), (3, 3));
        assert_eq!((geometry.pad_top, geometry.pad_left), (1, 0));
    }

    #[test]
    fn test_geometry_rejects_bad_inputs() {
        let config = Conv2dConfig::new(8, 5);
        assert!(config.geometry(&Shape::new(vec![1, 4, 10, 3])).is_err());
        assert!(config.geometry(&Shape::new(vec![10, 10, 3])).is_err());
        assert!(Conv2dConfig::new(0, 3).geometry(&Shape::new(vec![1, 4, 4, 1])).is_err());
    }

    #[test]
    fn test_glorot_limits() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = Conv2d::build(Conv2dConfig::new(32, 7), 3, &mut rng);
        let limit = (6.0f32 / (147 + 1568) as f32).sqrt();
        assert_eq!(layer.kernel().shape().dims(), &[7, 7, 3, 32]);
        assert!(layer.kernel().data().iter().all(|w| w.abs() <= limit));
        assert!(layer.bias().data().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_forward_on_cpu() {
        let backend = CpuBackend::default();
        let kernel = Tensor::from_vec([1, 1, 2, 1], vec![2.0, -1.0]).unwrap();
        let bias = Tensor::from_vec([1], vec![1.0]).unwrap();
        let layer = Conv2d::with_weights(Conv2dConfig::new(1, 1), kernel, bias).unwrap();

        let input = Tensor::from_vec([1, 1, 2, 2], vec![3.0, 4.0, 5.0, 1.0]).unwrap();
        let out = layer.forward(&backend, &input).unwrap();
        assert_eq!(out.data(), &[3.0, 10.0]);
    }

    #[test]
    fn test_forward_rejects_channel_mismatch() {
        let backend = CpuBackend::default();
        let mut rng = StdRng::seed_from_u64(0);
        let layer = Conv2d::build(Conv2dConfig::new(2, 1), 3, &mut rng);
        let input = Tensor::zeros([1, 2, 2, 1]);
        assert!(layer.forward(&backend, &input).is_err());
    }
}
