//! Benchmark results and reporting

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use serde::{Serialize, Serializer};

use super::timing::speedup_ratio;
use crate::device::{DeviceCounts, DeviceKind, DeviceRegistry};
use crate::error::BenchResult;

/// CPU versus GPU timing for one operation
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub operation: String,
    pub description: String,
    #[serde(serialize_with = "as_secs")]
    pub cpu_time: Duration,
    #[serde(serialize_with = "as_secs_opt")]
    pub gpu_time: Option<Duration>,
    /// Whole-number CPU/GPU ratio, present only with a GPU measurement
    pub speedup: Option<u64>,
}

impl ComparisonResult {
    pub fn new(
        operation: impl Into<String>,
        description: impl Into<String>,
        cpu_time: Duration,
        gpu_time: Option<Duration>,
    ) -> Self {
        let speedup = gpu_time.and_then(|gpu| speedup_ratio(cpu_time, gpu));
        Self {
            operation: operation.into(),
            description: description.into(),
            cpu_time,
            gpu_time,
            speedup,
        }
    }

    pub fn print(&self) {
        println!();
        print!("{}", self);
    }
}

impl fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.operation)?;
        writeln!(f, "{}", self.description)?;
        writeln!(f, "CPU (s): {:.4}", self.cpu_time.as_secs_f64())?;
        match self.gpu_time {
            Some(gpu) => writeln!(f, "GPU (s): {:.4}", gpu.as_secs_f64())?,
            None => writeln!(f, "GPU: not found")?,
        }
        if let Some(speedup) = self.speedup {
            writeln!(f, "GPU speedup over CPU: {}x", speedup)?;
        }
        Ok(())
    }
}

/// What the runtime saw and opened
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub counts: DeviceCounts,
    pub physical_gpus: Vec<String>,
}

impl DeviceSummary {
    /// Collect from `registry`, initializing it if it is not already
    pub fn collect(registry: &mut DeviceRegistry) -> BenchResult<Self> {
        let counts = registry.counts()?;
        let physical_gpus = registry
            .list_physical_devices(DeviceKind::Gpu)
            .into_iter()
            .map(|device| format!("{}: {}", device.name, device.description))
            .collect();
        Ok(Self { counts, physical_gpus })
    }

    pub fn print(&self) {
        println!(
            "{} Physical GPUs, {} Logical GPUs",
            self.counts.physical_gpus, self.counts.logical_gpus
        );
        for name in &self.physical_gpus {
            println!("  {}", name);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub timestamp: String,
    pub devices: DeviceSummary,
    pub results: Vec<ComparisonResult>,
}

impl BenchmarkReport {
    pub fn new(devices: DeviceSummary, results: Vec<ComparisonResult>) -> Self {
        Self {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            devices,
            results,
        }
    }

    /// Write the report as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> BenchResult<()> {
        let path = path.as_ref();
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        log::info!("[BenchmarkReport] Saved {} results to {}", self.results.len(), path.display());
        Ok(())
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

fn as_secs_opt<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match duration {
        Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_gpu_means_no_speedup() {
        let result = ComparisonResult::new("matmul", "", Duration::from_millis(20), None);
        assert!(result.gpu_time.is_none());
        assert!(result.speedup.is_none());
    }

    #[test]
    fn test_rendering_without_gpu_omits_speedup() {
        let result = ComparisonResult::new("matmul", "desc", Duration::from_millis(250), None);
        let text = result.to_string();
        assert!(text.contains("CPU (s): 0.2500"));
        assert!(text.contains("GPU: not found"));
        assert!(!text.contains("GPU (s)"));
        assert!(!text.contains("speedup"));
    }

    #[test]
    fn test_rendering_with_gpu_shows_speedup() {
        let result = ComparisonResult::new(
            "matmul",
            "desc",
            Duration::from_millis(900),
            Some(Duration::from_millis(200)),
        );
        let text = result.to_string();
        assert!(text.contains("GPU (s): 0.2000"));
        assert!(text.contains("GPU speedup over CPU: 4x"));
        assert!(!text.contains("not found"));
    }

    #[test]
    fn test_speedup_is_floored_ratio() {
        let result = ComparisonResult::new(
            "conv",
            "",
            Duration::from_millis(950),
            Some(Duration::from_millis(100)),
        );
        assert_eq!(result.speedup, Some(9));
    }

    #[test]
    fn test_report_serializes_seconds() {
        let devices = DeviceSummary {
            counts: DeviceCounts {
                physical_cpus: 1,
                physical_gpus: 0,
                logical_cpus: 1,
                logical_gpus: 0,
            },
            physical_gpus: Vec::new(),
        };
        let result = ComparisonResult::new("matmul", "desc", Duration::from_millis(1500), None);
        let report = BenchmarkReport::new(devices, vec![result]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["cpu_time"], 1.5);
        assert!(json["results"][0]["gpu_time"].is_null());
        assert!(json["results"][0]["speedup"].is_null());
        assert_eq!(json["devices"]["counts"]["logical_cpus"], 1);
    }

    #[test]
    fn test_report_save_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let devices = DeviceSummary {
            counts: DeviceCounts {
                physical_cpus: 1,
                physical_gpus: 0,
                logical_cpus: 1,
                logical_gpus: 0,
            },
            physical_gpus: Vec::new(),
        };
        BenchmarkReport::new(devices, Vec::new()).save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"timestamp\""));
    }
}
