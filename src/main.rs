/// CPU vs GPU benchmark runner
/// Runs device setup, the matmul comparison and the convolution comparison in order

use anyhow::{Context, Result};
use device_bench::{
    configure_memory_growth, run_conv_benchmark, run_matmul_benchmark, BenchConfig, BenchmarkReport,
    DeviceRegistry, DeviceSummary,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn,device_bench=info"))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => BenchConfig::load(&path).with_context(|| format!("loading config {}", path))?,
        None => BenchConfig::from_env().context("loading config")?,
    };
    log::info!("Execution mode: {:?}", config.execution);

    let mut registry = DeviceRegistry::new(&config.devices, config.execution)?;

    // Device setup
    match configure_memory_growth(&mut registry, config.devices.memory_growth) {
        Ok((physical, logical)) => {
            if physical > 0 {
                println!("{} Physical GPUs, {} Logical GPUs", physical, logical);
            }
        }
        // Late configuration is reported and the run carries on
        Err(e) if e.is_already_initialized() => {
            println!("{}", e);
        }
        Err(e) => return Err(e.into()),
    }

    let mut results = Vec::new();

    let matmul = run_matmul_benchmark(&mut registry, &config.matmul)?;
    matmul.print();
    results.push(matmul);

    let conv = run_conv_benchmark(&mut registry, &config.conv)?;
    conv.print();
    results.push(conv);

    if let Some(output) = &config.output {
        let devices = DeviceSummary::collect(&mut registry)?;
        BenchmarkReport::new(devices, results)
            .save(output)
            .with_context(|| format!("writing report to {}", output.display()))?;
        println!("\nResults saved to: {}", output.display());
    }

    Ok(())
}
