//! Device registry and placement scope

use serde::Serialize;

use super::{DeviceKind, LogicalDevice, MemoryPolicy, PhysicalDevice, Placement};
use crate::backend::{ComputeBackend, CpuBackend, ExecutionMode, GpuBackend};
use crate::config::{DeviceConfig, PowerPreference};
use crate::error::{BenchError, BenchResult};

/// Work that can run on whichever backend a placement resolves to
pub trait Workload {
    type Output;

    fn run<B: ComputeBackend>(&mut self, backend: &B) -> BenchResult<Self::Output>;
}

/// Owns adapter discovery and, once initialized, every logical device
pub struct DeviceRegistry {
    config: DeviceConfig,
    execution: ExecutionMode,
    // Kept alive so adapters stay valid
    _instance: wgpu::Instance,
    adapters: Vec<wgpu::Adapter>,
    cpu_physical: PhysicalDevice,
    gpu_physical: Vec<PhysicalDevice>,
    memory_growth: Vec<bool>,
    cpu: Option<CpuBackend>,
    gpus: Vec<GpuBackend>,
    initialized: bool,
}

impl DeviceRegistry {
    /// Discover physical devices. Nothing is opened until
    /// [`list_logical_devices`](Self::list_logical_devices) or a placement
    /// needs it.
    pub fn new(config: &DeviceConfig, execution: ExecutionMode) -> BenchResult<Self> {
        let backends = config.backends.to_wgpu();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let mut adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(backends)
            .into_iter()
            .filter(|adapter| {
                let info = adapter.get_info();
                let software = info.device_type == wgpu::DeviceType::Cpu;
                if software && !config.allow_software_adapter {
                    log::info!(
                        "[DeviceRegistry] Skipping software adapter {} ({:?})",
                        info.name,
                        info.backend
                    );
                    return false;
                }
                true
            })
            .collect();

        // Preferred adapter class first, so /device:GPU:0 is the one a
        // default adapter request would have picked
        adapters.sort_by_key(|adapter| adapter_rank(adapter.get_info().device_type, config.power_preference));

        let gpu_physical: Vec<PhysicalDevice> = adapters
            .iter()
            .enumerate()
            .map(|(index, adapter)| {
                let info = adapter.get_info();
                PhysicalDevice {
                    name: format!("/physical_device:GPU:{}", index),
                    kind: DeviceKind::Gpu,
                    index,
                    description: format!("{} ({:?}, {:?})", info.name, info.backend, info.device_type),
                }
            })
            .collect();

        for device in &gpu_physical {
            log::info!("[DeviceRegistry] Found {}: {}", device.name, device.description);
        }
        if gpu_physical.is_empty() {
            log::info!("[DeviceRegistry] No GPU adapters found for backends {:?}", backends);
        }

        let cpu_physical = PhysicalDevice {
            name: "/physical_device:CPU:0".to_string(),
            kind: DeviceKind::Cpu,
            index: 0,
            description: format!("{} logical cores", num_cpus::get()),
        };

        Ok(Self {
            config: config.clone(),
            execution,
            _instance: instance,
            memory_growth: vec![false; adapters.len()],
            adapters,
            cpu_physical,
            gpu_physical,
            cpu: None,
            gpus: Vec::new(),
            initialized: false,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn list_physical_devices(&self, kind: DeviceKind) -> Vec<PhysicalDevice> {
        match kind {
            DeviceKind::Cpu => vec![self.cpu_physical.clone()],
            DeviceKind::Gpu => self.gpu_physical.clone(),
        }
    }

    /// Request incremental allocation for `device`. Only valid before the
    /// runtime is initialized.
    pub fn set_memory_growth(&mut self, device: &PhysicalDevice, enable: bool) -> BenchResult<()> {
        if self.initialized {
            return Err(BenchError::DevicesAlreadyInitialized);
        }

        match device.kind {
            DeviceKind::Cpu => {
                log::debug!("[DeviceRegistry] Memory growth has no effect on {}", device.name);
                Ok(())
            }
            DeviceKind::Gpu => {
                let slot = self
                    .memory_growth
                    .get_mut(device.index)
                    .ok_or_else(|| BenchError::DeviceNotFound {
                        placement: device.name.clone(),
                    })?;
                *slot = enable;
                log::debug!("[DeviceRegistry] Memory growth for {} set to {}", device.name, enable);
                Ok(())
            }
        }
    }

    pub fn get_memory_growth(&self, device: &PhysicalDevice) -> BenchResult<bool> {
        match device.kind {
            DeviceKind::Cpu => Ok(false),
            DeviceKind::Gpu => self
                .memory_growth
                .get(device.index)
                .copied()
                .ok_or_else(|| BenchError::DeviceNotFound {
                    placement: device.name.clone(),
                }),
        }
    }

    /// Open every logical device. Idempotent.
    ///
    /// A GPU whose device request fails is logged and left out, so the
    /// logical GPU count can be lower than the physical one.
    pub fn initialize(&mut self) -> BenchResult<()> {
        if self.initialized {
            return Ok(());
        }

        self.cpu = Some(CpuBackend::new(0));

        for (physical_index, adapter) in self.adapters.iter().enumerate() {
            let policy = if self.memory_growth[physical_index] {
                MemoryPolicy::Growth
            } else {
                MemoryPolicy::Reserve {
                    bytes: self.config.reserve_bytes,
                }
            };

            let logical_index = self.gpus.len();
            match GpuBackend::new(adapter, logical_index, policy, self.execution) {
                Ok(backend) => self.gpus.push(backend),
                Err(e) => {
                    log::warn!(
                        "[DeviceRegistry] Could not open {}: {}",
                        self.gpu_physical[physical_index].name,
                        e
                    );
                }
            }
        }

        self.initialized = true;
        log::info!(
            "[DeviceRegistry] Initialized 1 logical CPU and {} logical GPU(s)",
            self.gpus.len()
        );
        Ok(())
    }

    /// List opened devices, initializing the runtime on first use
    pub fn list_logical_devices(&mut self, kind: DeviceKind) -> BenchResult<Vec<LogicalDevice>> {
        self.initialize()?;

        let devices = match kind {
            DeviceKind::Cpu => self
                .cpu
                .iter()
                .map(|backend| logical_device(backend.info()))
                .collect(),
            DeviceKind::Gpu => self
                .gpus
                .iter()
                .map(|backend| logical_device(backend.info()))
                .collect(),
        };
        Ok(devices)
    }

    /// Whether a GPU placement can succeed
    pub fn is_gpu_available(&self) -> bool {
        if self.initialized {
            !self.gpus.is_empty()
        } else {
            !self.adapters.is_empty()
        }
    }

    /// Run `workload` with all of its operations placed on `placement`
    pub fn with_device<W: Workload>(
        &mut self,
        placement: Placement,
        workload: &mut W,
    ) -> BenchResult<W::Output> {
        self.initialize()?;

        let not_found = || BenchError::DeviceNotFound {
            placement: placement.to_string(),
        };

        log::debug!("[DeviceRegistry] Entering placement scope {}", placement);
        match placement.kind {
            DeviceKind::Cpu => {
                let backend = self
                    .cpu
                    .as_ref()
                    .filter(|_| placement.index == 0)
                    .ok_or_else(not_found)?;
                workload.run(backend)
            }
            DeviceKind::Gpu => {
                let backend = self.gpus.get(placement.index).ok_or_else(not_found)?;
                workload.run(backend)
            }
        }
    }

    pub fn counts(&mut self) -> BenchResult<DeviceCounts> {
        Ok(DeviceCounts {
            physical_cpus: 1,
            physical_gpus: self.gpu_physical.len(),
            logical_cpus: self.list_logical_devices(DeviceKind::Cpu)?.len(),
            logical_gpus: self.list_logical_devices(DeviceKind::Gpu)?.len(),
        })
    }
}

/// Device totals as reported after initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceCounts {
    pub physical_cpus: usize,
    pub physical_gpus: usize,
    pub logical_cpus: usize,
    pub logical_gpus: usize,
}

/// Apply `enable` as the memory growth setting of every physical GPU, then
/// initialize and return `(physical, logical)` GPU counts.
///
/// Fails with [`BenchError::DevicesAlreadyInitialized`] when the runtime
/// was opened before this call, as long as there is at least one GPU to
/// configure.
pub fn configure_memory_growth(
    registry: &mut DeviceRegistry,
    enable: bool,
) -> BenchResult<(usize, usize)> {
    let gpus = registry.list_physical_devices(DeviceKind::Gpu);
    for gpu in &gpus {
        registry.set_memory_growth(gpu, enable)?;
    }
    let logical = registry.list_logical_devices(DeviceKind::Gpu)?;
    Ok((gpus.len(), logical.len()))
}

fn logical_device(info: &crate::backend::BackendInfo) -> LogicalDevice {
    LogicalDevice {
        name: info.name.clone(),
        kind: info.kind,
        index: info.index,
    }
}

fn adapter_rank(device_type: wgpu::DeviceType, preference: PowerPreference) -> u8 {
    match (preference, device_type) {
        (PowerPreference::HighPerformance, wgpu::DeviceType::DiscreteGpu) => 0,
        (PowerPreference::HighPerformance, wgpu::DeviceType::IntegratedGpu) => 1,
        (PowerPreference::LowPower, wgpu::DeviceType::IntegratedGpu) => 0,
        (PowerPreference::LowPower, wgpu::DeviceType::DiscreteGpu) => 1,
        (_, wgpu::DeviceType::VirtualGpu) => 2,
        (_, wgpu::DeviceType::Other) => 3,
        (_, wgpu::DeviceType::Cpu) => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendSelection;

    fn cpu_only_registry() -> DeviceRegistry {
        let config = DeviceConfig {
            backends: BackendSelection::None,
            ..Default::default()
        };
        DeviceRegistry::new(&config, ExecutionMode::Eager).unwrap()
    }

    struct WhereAmI;

    impl Workload for WhereAmI {
        type Output = DeviceKind;

        fn run<B: ComputeBackend>(&mut self, backend: &B) -> BenchResult<DeviceKind> {
            Ok(backend.info().kind)
        }
    }

    #[test]
    fn test_cpu_only_enumeration() {
        let mut registry = cpu_only_registry();
        assert_eq!(registry.list_physical_devices(DeviceKind::Cpu).len(), 1);
        assert!(registry.list_physical_devices(DeviceKind::Gpu).is_empty());
        assert!(!registry.is_gpu_available());
        assert!(!registry.is_initialized());

        let counts = registry.counts().unwrap();
        assert_eq!(counts.logical_cpus, 1);
        assert_eq!(counts.logical_gpus, 0);
        assert!(registry.is_initialized());
    }

    #[test]
    fn test_memory_growth_after_initialization_fails() {
        let mut registry = cpu_only_registry();
        let cpu = registry.list_physical_devices(DeviceKind::Cpu).remove(0);
        registry.set_memory_growth(&cpu, true).unwrap();

        registry.list_logical_devices(DeviceKind::Cpu).unwrap();

        let err = registry.set_memory_growth(&cpu, true).unwrap_err();
        assert!(err.is_already_initialized());
        assert_eq!(
            err.to_string(),
            "Physical devices cannot be modified after being initialized"
        );
    }

    #[test]
    fn test_memory_growth_round_trips_before_initialization() {
        let mut registry = cpu_only_registry();
        let cpu = registry.list_physical_devices(DeviceKind::Cpu).remove(0);
        registry.set_memory_growth(&cpu, true).unwrap();
        // Host memory is never reserved up front
        assert!(!registry.get_memory_growth(&cpu).unwrap());

        let ghost = PhysicalDevice {
            name: "/physical_device:GPU:3".to_string(),
            kind: DeviceKind::Gpu,
            index: 3,
            description: String::new(),
        };
        assert!(matches!(
            registry.get_memory_growth(&ghost).unwrap_err(),
            BenchError::DeviceNotFound { .. }
        ));
    }

    #[test]
    fn test_memory_growth_unknown_gpu() {
        let mut registry = cpu_only_registry();
        let ghost = PhysicalDevice {
            name: "/physical_device:GPU:7".to_string(),
            kind: DeviceKind::Gpu,
            index: 7,
            description: String::new(),
        };
        assert!(matches!(
            registry.set_memory_growth(&ghost, true).unwrap_err(),
            BenchError::DeviceNotFound { .. }
        ));
    }

    #[test]
    fn test_placement_scope_resolves_cpu_and_rejects_missing_gpu() {
        let mut registry = cpu_only_registry();
        let kind = registry.with_device(Placement::cpu(0), &mut WhereAmI).unwrap();
        assert_eq!(kind, DeviceKind::Cpu);

        let err = registry.with_device(Placement::gpu(0), &mut WhereAmI).unwrap_err();
        assert!(matches!(err, BenchError::DeviceNotFound { .. }));

        let err = registry.with_device(Placement::cpu(1), &mut WhereAmI).unwrap_err();
        assert!(matches!(err, BenchError::DeviceNotFound { .. }));
    }

    #[test]
    fn test_configure_memory_growth_without_gpus() {
        let mut registry = cpu_only_registry();
        assert_eq!(configure_memory_growth(&mut registry, true).unwrap(), (0, 0));
        // Nothing to configure, so a second pass is still fine
        assert_eq!(configure_memory_growth(&mut registry, true).unwrap(), (0, 0));
    }

    #[test]
    fn test_adapter_rank_prefers_requested_class() {
        let high = PowerPreference::HighPerformance;
        assert!(adapter_rank(wgpu::DeviceType::DiscreteGpu, high) < adapter_rank(wgpu::DeviceType::IntegratedGpu, high));
        let low = PowerPreference::LowPower;
        assert!(adapter_rank(wgpu::DeviceType::IntegratedGpu, low) < adapter_rank(wgpu::DeviceType::DiscreteGpu, low));
    }
}
