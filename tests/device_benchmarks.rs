/// Device and benchmark integration tests
///
/// Run on any machine. The CPU-only registry never opens a GPU, so these
/// exercise the "no GPU found" paths deterministically.

use std::time::Duration;

use device_bench::benchmarks::MatmulWorkload;
use device_bench::config::{BackendSelection, ConvConfig, DeviceConfig, MatmulConfig};
use device_bench::device::DeviceKind;
use device_bench::{
    configure_memory_growth, run_conv_benchmark, run_matmul_benchmark, BenchError, BenchmarkReport,
    DeviceRegistry, DeviceSummary, ExecutionMode, Placement, Tensor,
};

fn cpu_only_registry() -> DeviceRegistry {
    let config = DeviceConfig {
        backends: BackendSelection::None,
        ..Default::default()
    };
    DeviceRegistry::new(&config, ExecutionMode::Batched).unwrap()
}

fn small_conv() -> ConvConfig {
    ConvConfig {
        batch: 2,
        height: 12,
        width: 12,
        channels: 3,
        filters: 4,
        kernel_size: 3,
        trials: 2,
        seed: Some(3),
        ..Default::default()
    }
}

#[test]
fn test_matmul_benchmark_without_gpu() {
    let mut registry = cpu_only_registry();
    let config = MatmulConfig {
        size: 16,
        steps: 4,
        seed: Some(1),
    };

    let result = run_matmul_benchmark(&mut registry, &config).unwrap();
    assert!(result.cpu_time.as_secs_f64().is_finite());
    assert!(result.gpu_time.is_none());
    assert!(result.speedup.is_none());
}

#[test]
fn test_conv_benchmark_without_gpu() {
    let mut registry = cpu_only_registry();
    let result = run_conv_benchmark(&mut registry, &small_conv()).unwrap();
    assert!(result.cpu_time > Duration::ZERO);
    assert!(result.gpu_time.is_none());
    assert!(result.speedup.is_none());
}

#[test]
fn test_device_counts_are_consistent() {
    let mut registry = cpu_only_registry();
    let counts = registry.counts().unwrap();
    assert_eq!(counts.physical_gpus, 0);
    assert!(counts.logical_gpus <= counts.physical_gpus);
    assert_eq!(counts.logical_cpus, 1);
}

#[test]
fn test_memory_growth_before_and_after_initialization() {
    let mut registry = cpu_only_registry();
    let (physical, logical) = configure_memory_growth(&mut registry, true).unwrap();
    assert_eq!((physical, logical), (0, 0));
    assert!(registry.is_initialized());

    let cpu = registry.list_physical_devices(DeviceKind::Cpu).remove(0);
    let err = registry.set_memory_growth(&cpu, true).unwrap_err();
    assert!(matches!(err, BenchError::DevicesAlreadyInitialized));
    assert_eq!(
        err.to_string(),
        "Physical devices cannot be modified after being initialized"
    );
}

#[test]
fn test_gpu_placement_without_gpu_is_not_found() {
    let mut registry = cpu_only_registry();
    let matrix = Tensor::zeros([4, 4]);
    let mut workload = MatmulWorkload::new(&matrix, 1);
    let err = registry
        .with_device(Placement::gpu(0), &mut workload)
        .unwrap_err();
    assert!(matches!(err, BenchError::DeviceNotFound { .. }));
}

#[test]
fn test_report_roundtrip_to_disk() {
    let mut registry = cpu_only_registry();
    let config = MatmulConfig {
        size: 8,
        steps: 1,
        seed: Some(2),
    };
    let result = run_matmul_benchmark(&mut registry, &config).unwrap();
    let devices = DeviceSummary::collect(&mut registry).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");
    BenchmarkReport::new(devices, vec![result]).save(&path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["results"][0]["operation"], "Matrix Multiplication");
    assert_eq!(value["devices"]["counts"]["physical_gpus"], 0);
}

#[test]
fn test_gpu_memory_growth_round_trip_and_late_configuration() {
    let mut registry = DeviceRegistry::new(&DeviceConfig::default(), ExecutionMode::Eager).unwrap();
    let Some(gpu) = registry.list_physical_devices(DeviceKind::Gpu).into_iter().next() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    registry.set_memory_growth(&gpu, false).unwrap();
    assert!(!registry.get_memory_growth(&gpu).unwrap());
    registry.set_memory_growth(&gpu, true).unwrap();
    assert!(registry.get_memory_growth(&gpu).unwrap());

    registry.initialize().unwrap();
    let err = configure_memory_growth(&mut registry, true).unwrap_err();
    assert!(err.is_already_initialized());
    // The setting made before initialization is kept
    assert!(registry.get_memory_growth(&gpu).unwrap());
}
