//! Device check utility to diagnose adapter and runtime initialization

use device_bench::config::DeviceConfig;
use device_bench::device::DeviceKind;
use device_bench::{DeviceRegistry, DeviceSummary, ExecutionMode};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .format_timestamp_millis()
        .init();

    println!("=== Device Check Utility ===");

    if let Ok(backend) = std::env::var("WGPU_BACKEND") {
        log::info!("WGPU_BACKEND set to: {}", backend);
    } else {
        log::info!("WGPU_BACKEND not set, will use auto-detection");
    }

    list_adapters();

    match check_registry() {
        Ok(()) => {
            println!("\nDevice initialization successful!");
        }
        Err(e) => {
            println!("\nDevice initialization failed!");
            log::error!("Device check failed: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn list_adapters() {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapters = instance.enumerate_adapters(wgpu::Backends::all());
    if adapters.is_empty() {
        println!("\nNo GPU adapters found. Benchmarks will run on the CPU only.");
        return;
    }

    println!("\nFound {} adapter(s):", adapters.len());
    for (i, adapter) in adapters.iter().enumerate() {
        let info = adapter.get_info();
        let limits = adapter.limits();
        println!("  [{}] {}", i, info.name);
        println!("      Backend: {:?}", info.backend);
        println!("      Device Type: {:?}", info.device_type);
        println!("      Driver: {} {}", info.driver, info.driver_info);
        println!("      Max storage buffer binding: {} bytes", limits.max_storage_buffer_binding_size);
        println!("      Max buffer size: {} bytes", limits.max_buffer_size);
        println!(
            "      Max workgroups per dimension: {}",
            limits.max_compute_workgroups_per_dimension
        );
        println!(
            "      Max workgroup storage: {} bytes",
            limits.max_compute_workgroup_storage_size
        );
    }
}

fn check_registry() -> anyhow::Result<()> {
    let mut registry = DeviceRegistry::new(&DeviceConfig::default(), ExecutionMode::Eager)?;

    println!("\nPhysical devices:");
    for kind in [DeviceKind::Cpu, DeviceKind::Gpu] {
        for device in registry.list_physical_devices(kind) {
            println!("  {} ({})", device.name, device.description);
        }
    }

    println!("\nLogical devices:");
    for kind in [DeviceKind::Cpu, DeviceKind::Gpu] {
        for device in registry.list_logical_devices(kind)? {
            println!("  {}", device.name);
        }
    }

    println!();
    DeviceSummary::collect(&mut registry)?.print();
    Ok(())
}
