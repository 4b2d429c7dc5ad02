//! Crate-wide error type
//!
//! Every fallible operation in the library returns [`BenchResult`]. Binaries
//! wrap these in `anyhow` at the edge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    /// Raised when device configuration is attempted after the runtime
    /// has already created logical devices.
    #[error("Physical devices cannot be modified after being initialized")]
    DevicesAlreadyInitialized,

    #[error("Could not satisfy device specification '{placement}': no such device")]
    DeviceNotFound { placement: String },

    #[error("Invalid device specification '{spec}': {reason}")]
    InvalidPlacement { spec: String, reason: String },

    #[error("Failed to request device for adapter '{adapter}': {error}")]
    DeviceRequest { adapter: String, error: String },

    #[error("GPU operation '{operation}' failed: {error}")]
    GpuOperationFailed { operation: String, error: String },

    #[error("Failed to map GPU buffer: {buffer}")]
    BufferMapping { buffer: String },

    #[error("Buffer '{buffer}' needs {requested} bytes, device limit is {limit} bytes")]
    BufferTooLarge {
        buffer: String,
        requested: u64,
        limit: u64,
    },

    #[error("Shape mismatch in {operation}: {lhs} vs {rhs}")]
    ShapeMismatch {
        operation: String,
        lhs: String,
        rhs: String,
    },

    #[error("Invalid shape {shape}: {reason}")]
    InvalidShape { shape: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate
pub type BenchResult<T> = Result<T, BenchError>;

impl BenchError {
    /// True for the soft failure raised by late device configuration
    pub fn is_already_initialized(&self) -> bool {
        matches!(self, BenchError::DevicesAlreadyInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_late_configuration_is_soft() {
        assert!(BenchError::DevicesAlreadyInitialized.is_already_initialized());
        assert!(!BenchError::InvalidConfig("bad".into()).is_already_initialized());
        assert!(!BenchError::DeviceNotFound {
            placement: "/device:GPU:0".into()
        }
        .is_already_initialized());
    }
}
