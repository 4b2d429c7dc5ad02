//! Repeated matrix multiplication, CPU versus GPU

use std::time::Duration;

use super::report::ComparisonResult;
use super::seeded_rng;
use super::timing::time_matmul;
use crate::backend::ComputeBackend;
use crate::config::MatmulConfig;
use crate::device::{DeviceRegistry, Placement, Workload};
use crate::error::BenchResult;
use crate::tensor::Tensor;

/// Times chained self-multiplication of one matrix on whatever device it
/// is placed on
pub struct MatmulWorkload<'a> {
    matrix: &'a Tensor,
    steps: usize,
}

impl<'a> MatmulWorkload<'a> {
    pub fn new(matrix: &'a Tensor, steps: usize) -> Self {
        Self { matrix, steps }
    }
}

impl Workload for MatmulWorkload<'_> {
    type Output = Duration;

    fn run<B: ComputeBackend>(&mut self, backend: &B) -> BenchResult<Duration> {
        log::info!(
            "[MatmulWorkload] {} steps on {} ({})",
            self.steps,
            backend.info().name,
            backend.info().description
        );
        time_matmul(backend, self.matrix, self.steps)
    }
}

/// Run the matmul comparison. The GPU leg only runs when a GPU is present.
pub fn run_matmul_benchmark(
    registry: &mut DeviceRegistry,
    config: &MatmulConfig,
) -> BenchResult<ComparisonResult> {
    let mut rng = seeded_rng(config.seed);
    let matrix = Tensor::random_normal([config.size, config.size], &mut rng);
    let mut workload = MatmulWorkload::new(&matrix, config.steps);

    let cpu_time = registry.with_device(Placement::cpu(0), &mut workload)?;

    let gpu_time = if registry.is_gpu_available() {
        Some(registry.with_device(Placement::gpu(0), &mut workload)?)
    } else {
        log::info!("[run_matmul_benchmark] No GPU available, skipping GPU measurement");
        None
    };

    Ok(ComparisonResult::new(
        "Matrix Multiplication",
        format!(
            "Time (s) to multiply a {}x{} matrix by itself {} times",
            config.size, config.size, config.steps
        ),
        cpu_time,
        gpu_time,
    ))
}
