//! Network layers built on top of backend kernels

pub mod conv2d;

pub use conv2d::{Conv2d, Conv2dConfig, Conv2dGeometry, Padding};
