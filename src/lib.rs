pub mod backend;
pub mod benchmarks;
pub mod config;
pub mod device;
pub mod error;
pub mod layers;
pub mod tensor;

pub use backend::{ComputeBackend, CpuBackend, ExecutionMode, GpuBackend};
pub use benchmarks::{run_conv_benchmark, run_matmul_benchmark, BenchmarkReport, ComparisonResult, DeviceSummary};
pub use config::BenchConfig;
pub use device::{configure_memory_growth, DeviceKind, DeviceRegistry, Placement, Workload};
pub use error::{BenchError, BenchResult};
pub use tensor::{Shape, Tensor};
