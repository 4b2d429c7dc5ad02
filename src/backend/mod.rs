//! Compute backends
//!
//! A backend owns one logical device and runs the handful of tensor
//! operations the benchmarks need. Buffers returned by a backend stay on
//! that device; nothing is guaranteed to have finished executing until
//! [`ComputeBackend::materialize`] or [`ComputeBackend::synchronize`]
//! returns.

pub mod cpu;
pub mod error;
pub mod gpu;
pub mod pipelines;

use serde::{Deserialize, Serialize};

use crate::device::DeviceKind;
use crate::error::{BenchError, BenchResult};
use crate::layers::Conv2dGeometry;
use crate::tensor::{Shape, Tensor};

pub use cpu::CpuBackend;
pub use gpu::{GpuBackend, GpuBuffer};

/// How a backend hands work to its device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Every operation is submitted to the device as soon as it is issued
    Eager,
    /// Operations are recorded and submitted together at the next
    /// synchronization point
    Batched,
}

/// Identity of the device a backend runs on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendInfo {
    pub kind: DeviceKind,
    pub index: usize,
    pub name: String,
    pub description: String,
}

/// A tensor resident on some backend
pub trait DeviceBuffer {
    fn shape(&self) -> &Shape;
}

impl DeviceBuffer for Tensor {
    fn shape(&self) -> &Shape {
        Tensor::shape(self)
    }
}

pub trait ComputeBackend {
    type Buffer: DeviceBuffer;

    fn info(&self) -> &BackendInfo;

    fn execution_mode(&self) -> ExecutionMode;

    /// Switch execution mode. Pending batched work is flushed first.
    fn set_execution_mode(&self, mode: ExecutionMode) -> BenchResult<()>;

    /// Copy a host tensor onto the device
    fn upload(&self, tensor: &Tensor) -> BenchResult<Self::Buffer>;

    /// Standard normal samples generated on the device itself. The same
    /// seed reproduces the same buffer on one backend; different backends
    /// draw different streams.
    fn random_normal(&self, shape: Shape, seed: u64) -> BenchResult<Self::Buffer>;

    /// `a[m, k] x b[k, n]`
    fn matmul(&self, a: &Self::Buffer, b: &Self::Buffer) -> BenchResult<Self::Buffer>;

    /// NHWC input, HWIO kernel, one bias per output channel
    fn conv2d(
        &self,
        input: &Self::Buffer,
        kernel: &Self::Buffer,
        bias: &Self::Buffer,
        geometry: &Conv2dGeometry,
    ) -> BenchResult<Self::Buffer>;

    /// Sum of every element, as a scalar buffer
    fn reduce_sum(&self, input: &Self::Buffer) -> BenchResult<Self::Buffer>;

    /// Block until all issued work has completed
    fn synchronize(&self) -> BenchResult<()>;

    /// Wait for `buffer` to be computed and copy it back to the host
    fn materialize(&self, buffer: &Self::Buffer) -> BenchResult<Tensor>;
}

/// Validate operand shapes for matmul and return `(m, k, n)`
pub fn matmul_dims(a: &Shape, b: &Shape) -> BenchResult<(usize, usize, usize)> {
    let mismatch = || BenchError::ShapeMismatch {
        operation: "matmul".to_string(),
        lhs: a.to_string(),
        rhs: b.to_string(),
    };

    match (a.dims(), b.dims()) {
        (&[m, k], &[k2, n]) if k == k2 => {
            if m == 0 || k == 0 || n == 0 {
                return Err(BenchError::InvalidShape {
                    shape: format!("{} x {}", a, b),
                    reason: "matmul operands must be non-empty".to_string(),
                });
            }
            Ok((m, k, n))
        }
        _ => Err(mismatch()),
    }
}

/// Validate conv operands against the geometry they were planned with
pub fn check_conv_operands(
    input: &Shape,
    kernel: &Shape,
    bias: &Shape,
    geometry: &Conv2dGeometry,
) -> BenchResult<()> {
    let expect = |operation: &str, actual: &Shape, expected: Shape| {
        if *actual == expected {
            Ok(())
        } else {
            Err(BenchError::ShapeMismatch {
                operation: operation.to_string(),
                lhs: actual.to_string(),
                rhs: expected.to_string(),
            })
        }
    };

    expect("conv2d input", input, geometry.input_shape())?;
    expect("conv2d kernel", kernel, geometry.kernel_shape())?;
    expect("conv2d bias", bias, Shape::new(vec![geometry.out_c]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_dims() {
        let a = Shape::new(vec![3, 4]);
        let b = Shape::new(vec![4, 5]);
        assert_eq!(matmul_dims(&a, &b).unwrap(), (3, 4, 5));

        let err = matmul_dims(&b, &a).unwrap_err();
        assert!(matches!(err, BenchError::ShapeMismatch { .. }));

        let rank3 = Shape::new(vec![1, 3, 4]);
        assert!(matmul_dims(&rank3, &b).is_err());
    }

    #[test]
    fn test_matmul_dims_rejects_empty() {
        let a = Shape::new(vec![0, 4]);
        let b = Shape::new(vec![4, 5]);
        assert!(matches!(
            matmul_dims(&a, &b).unwrap_err(),
            BenchError::InvalidShape { .. }
        ));
    }
}
