//! Timing primitives
//!
//! Device work is asynchronous, so every measurement here ends with a
//! materialization of the last result before the clock is read.

use std::time::{Duration, Instant};

use crate::backend::ComputeBackend;
use crate::error::{BenchError, BenchResult};
use crate::tensor::Tensor;

/// Time `steps` chained self-multiplications of a square matrix.
///
/// One untimed multiplication runs first so pipeline creation and first-use
/// costs stay out of the measurement. Inside the timed region each product
/// becomes the operand of the next, and the final product is copied back to
/// the host before the clock stops.
pub fn time_matmul<B: ComputeBackend>(backend: &B, x: &Tensor, steps: usize) -> BenchResult<Duration> {
    let dims = x.shape().dims();
    if dims.len() != 2 || dims[0] != dims[1] {
        return Err(BenchError::ShapeMismatch {
            operation: "repeated matmul (square matrix required)".to_string(),
            lhs: x.shape().to_string(),
            rhs: x.shape().to_string(),
        });
    }

    let label = x.shape().to_string();
    let x = backend.upload(x)?;

    // Warm-up
    let warm = backend.matmul(&x, &x)?;
    backend.materialize(&warm)?;

    let start = Instant::now();
    let mut current: Option<B::Buffer> = None;
    for _ in 0..steps {
        let operand = current.as_ref().unwrap_or(&x);
        let next = backend.matmul(operand, operand)?;
        current = Some(next);
    }
    backend.materialize(current.as_ref().unwrap_or(&x))?;
    let elapsed = start.elapsed();

    log::debug!(
        "[time_matmul] {} matrix, {} steps on {}: {:?}",
        label,
        steps,
        backend.info().name,
        elapsed
    );
    Ok(elapsed)
}

/// Total wall-clock time of `number` sequential calls to `f`
pub fn timeit<F>(number: usize, mut f: F) -> BenchResult<Duration>
where
    F: FnMut() -> BenchResult<()>,
{
    let start = Instant::now();
    for _ in 0..number {
        f()?;
    }
    Ok(start.elapsed())
}

/// `floor(cpu / gpu)`, or `None` when there is no meaningful GPU time
pub fn speedup_ratio(cpu: Duration, gpu: Duration) -> Option<u64> {
    if gpu.is_zero() {
        return None;
    }
    let ratio = cpu.as_secs_f64() / gpu.as_secs_f64();
    ratio.is_finite().then(|| ratio.floor() as u64)
}
