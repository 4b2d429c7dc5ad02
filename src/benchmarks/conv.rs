//! Repeated 2D convolution, CPU versus GPU
//!
//! Each trial draws a fresh random image batch on the placed device, builds a
//! fresh layer, runs it, and reduces the result to a scalar that is read back
//! to the host.
//! GPU work is forced into eager mode for the whole measurement so every
//! trial pays its own dispatch cost.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;

use super::report::ComparisonResult;
use super::seeded_rng;
use super::timing::timeit;
use crate::backend::{ComputeBackend, ExecutionMode};
use crate::config::ConvConfig;
use crate::device::{DeviceRegistry, Placement, Workload};
use crate::error::{BenchError, BenchResult};
use crate::layers::{Conv2d, Conv2dConfig};
use crate::tensor::Shape;

impl From<&ConvConfig> for Conv2dConfig {
    fn from(config: &ConvConfig) -> Self {
        Self {
            filters: config.filters,
            kernel_size: (config.kernel_size, config.kernel_size),
            strides: (config.stride, config.stride),
            padding: config.padding,
            use_bias: true,
        }
    }
}

pub struct ConvWorkload<'a> {
    config: &'a ConvConfig,
    rng: StdRng,
}

impl<'a> ConvWorkload<'a> {
    pub fn new(config: &'a ConvConfig) -> Self {
        Self {
            config,
            rng: seeded_rng(config.seed),
        }
    }

    /// One forward pass plus reduction; returns the scalar sum
    pub fn trial<B: ComputeBackend>(&mut self, backend: &B) -> BenchResult<f32> {
        let seed: u64 = self.rng.gen();
        let input = backend.random_normal(Shape::from(self.config.input_dims()), seed)?;
        let layer = Conv2d::build(Conv2dConfig::from(self.config), self.config.channels, &mut self.rng);

        let features = layer.forward(backend, &input)?;
        let total = backend.reduce_sum(&features)?;
        let value = backend.materialize(&total)?;

        value.item().ok_or_else(|| BenchError::InvalidShape {
            shape: value.shape().to_string(),
            reason: "reduction did not produce a scalar".to_string(),
        })
    }

    fn measure<B: ComputeBackend>(&mut self, backend: &B) -> BenchResult<Duration> {
        // Warm-up
        self.trial(backend)?;
        timeit(self.config.trials, || self.trial(backend).map(|_| ()))
    }
}

impl Workload for ConvWorkload<'_> {
    type Output = Duration;

    fn run<B: ComputeBackend>(&mut self, backend: &B) -> BenchResult<Duration> {
        log::info!(
            "[ConvWorkload] {} trials on {} ({})",
            self.config.trials,
            backend.info().name,
            backend.info().description
        );

        let previous = backend.execution_mode();
        backend.set_execution_mode(ExecutionMode::Eager)?;
        let outcome = self.measure(backend);
        backend.set_execution_mode(previous)?;
        outcome
    }
}

/// Run the convolution comparison. The GPU leg only runs when a GPU is
/// present.
pub fn run_conv_benchmark(
    registry: &mut DeviceRegistry,
    config: &ConvConfig,
) -> BenchResult<ComparisonResult> {
    let mut workload = ConvWorkload::new(config);

    let cpu_time = registry.with_device(Placement::cpu(0), &mut workload)?;

    let gpu_time = if registry.is_gpu_available() {
        Some(registry.with_device(Placement::gpu(0), &mut workload)?)
    } else {
        log::info!("[run_conv_benchmark] No GPU available, skipping GPU measurement");
        None
    };

    let [batch, height, width, channels] = config.input_dims();
    Ok(ComparisonResult::new(
        "2D Convolution",
        format!(
            "Time (s) to convolve {}x{}x{}x{} filter over random {}x{}x{}x{} images \
             (batch x height x width x channel). Sum of {} runs.",
            config.filters,
            config.kernel_size,
            config.kernel_size,
            channels,
            batch,
            height,
            width,
            channels,
            config.trials
        ),
        cpu_time,
        gpu_time,
    ))
}
