/// CPU vs GPU benchmark module
pub mod conv;
pub mod matmul;
pub mod report;
pub mod timing;

use rand::rngs::StdRng;
use rand::SeedableRng;

pub use conv::{run_conv_benchmark, ConvWorkload};
pub use matmul::{run_matmul_benchmark, MatmulWorkload};
pub use report::{BenchmarkReport, ComparisonResult, DeviceSummary};
pub use timing::{speedup_ratio, time_matmul, timeit};

/// Deterministic when a seed is configured, entropy-seeded otherwise
pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
