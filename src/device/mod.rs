//! Device discovery and placement
//!
//! Physical devices are what the machine offers: the host CPU plus every
//! wgpu adapter that counts as a GPU. Logical devices are what the runtime
//! has actually opened. Opening happens once, lazily, and freezes the
//! physical configuration (memory growth) from then on.

pub mod placement;
pub mod registry;

use std::fmt;

use serde::Serialize;

pub use placement::Placement;
pub use registry::{configure_memory_growth, DeviceCounts, DeviceRegistry, Workload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "CPU"),
            DeviceKind::Gpu => write!(f, "GPU"),
        }
    }
}

/// A compute unit present on the machine, before any runtime state exists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhysicalDevice {
    /// `/physical_device:GPU:0` style name
    pub name: String,
    pub kind: DeviceKind,
    pub index: usize,
    /// Adapter or CPU description
    pub description: String,
}

/// A device the runtime has opened and can place work on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalDevice {
    /// `/device:GPU:0` style name
    pub name: String,
    pub kind: DeviceKind,
    pub index: usize,
}

/// How a GPU's memory is claimed when its logical device is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MemoryPolicy {
    /// Allocate per operation as the workload needs it
    Growth,
    /// Claim a fixed block at initialization and hold it
    Reserve { bytes: u64 },
}
