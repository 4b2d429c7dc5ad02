//! Host-side dense tensors
//!
//! Tensors here are plain row-major `f32` arrays with a shape attached. They
//! are created on the host, uploaded to a backend for work, and come back as
//! a new `Tensor` when a backend materializes a result.

use std::fmt;

use rand::distributions::Uniform;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};

/// Dimensions of a tensor, outermost first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of elements. A rank-0 shape holds one element.
    pub fn len(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes when stored as `f32`
    pub fn byte_size(&self) -> u64 {
        (self.len() * std::mem::size_of::<f32>()) as u64
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "scalar");
        }
        let parts: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", parts.join("x"))
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

/// Dense row-major `f32` tensor living in host memory
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f32>,
}

impl Tensor {
    /// Wrap existing data. Fails if `data` does not fill `shape` exactly.
    pub fn from_vec(shape: impl Into<Shape>, data: Vec<f32>) -> BenchResult<Self> {
        let shape = shape.into();
        if shape.len() != data.len() {
            return Err(BenchError::InvalidShape {
                shape: shape.to_string(),
                reason: format!("expected {} elements, got {}", shape.len(), data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let data = vec![0.0; shape.len()];
        Self { shape, data }
    }

    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Shape::scalar(),
            data: vec![value],
        }
    }

    /// Samples from the standard normal distribution
    pub fn random_normal<R: Rng>(shape: impl Into<Shape>, rng: &mut R) -> Self {
        let shape = shape.into();
        let data = (0..shape.len())
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        Self { shape, data }
    }

    /// Samples uniformly from `[low, high)`
    pub fn random_uniform<R: Rng>(
        shape: impl Into<Shape>,
        low: f32,
        high: f32,
        rng: &mut R,
    ) -> Self {
        let shape = shape.into();
        let dist = Uniform::new(low, high);
        let data = (0..shape.len()).map(|_| rng.sample(dist)).collect();
        Self { shape, data }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value of a single-element tensor
    pub fn item(&self) -> Option<f32> {
        match self.data.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_shape_len_and_display() {
        let shape = Shape::new(vec![100, 100, 100, 3]);
        assert_eq!(shape.len(), 3_000_000);
        assert_eq!(shape.rank(), 4);
        assert_eq!(shape.to_string(), "100x100x100x3");
        assert_eq!(shape.byte_size(), 12_000_000);

        let scalar = Shape::scalar();
        assert_eq!(scalar.len(), 1);
        assert_eq!(scalar.to_string(), "scalar");
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let err = Tensor::from_vec([2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, BenchError::InvalidShape { .. }));

        let ok = Tensor::from_vec([2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(ok.shape().dims(), &[2, 3]);
    }

    #[test]
    fn test_random_normal_is_reproducible_and_centered() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let x = Tensor::random_normal([200, 200], &mut a);
        let y = Tensor::random_normal([200, 200], &mut b);
        assert_eq!(x, y);

        let mean = x.data().iter().sum::<f32>() / x.data().len() as f32;
        assert!(mean.abs() < 0.05, "mean {} too far from zero", mean);
    }

    #[test]
    fn test_random_uniform_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let t = Tensor::random_uniform([1000], -0.5, 0.5, &mut rng);
        assert!(t.data().iter().all(|&v| (-0.5..0.5).contains(&v)));
    }

    #[test]
    fn test_item_only_for_single_element() {
        assert_eq!(Tensor::scalar(3.5).item(), Some(3.5));
        assert_eq!(Tensor::zeros([2]).item(), None);
    }
}
