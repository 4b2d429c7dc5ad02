//! Backend error helpers
//!
//! Constructors for GPU-side failures and a context trait so backend code
//! can attach an operation name to foreign errors with `?`.

use crate::error::{BenchError, BenchResult};

/// Helper trait for attaching the failing GPU operation to an error
pub trait GpuErrorContext<T> {
    fn gpu_context(self, operation: &str) -> BenchResult<T>;
}

impl<T, E> GpuErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn gpu_context(self, operation: &str) -> BenchResult<T> {
        self.map_err(|e| gpu_operation_error(operation, e))
    }
}

/// Create a GPU operation error
pub fn gpu_operation_error(operation: &str, error: impl std::fmt::Display) -> BenchError {
    BenchError::GpuOperationFailed {
        operation: operation.to_string(),
        error: error.to_string(),
    }
}

/// Create a buffer mapping error
pub fn buffer_mapping_error(buffer: &str) -> BenchError {
    BenchError::BufferMapping {
        buffer: buffer.to_string(),
    }
}

/// Create an error for a buffer the device cannot hold or bind
pub fn buffer_too_large(buffer: &str, requested: u64, limit: u64) -> BenchError {
    BenchError::BufferTooLarge {
        buffer: buffer.to_string(),
        requested,
        limit,
    }
}
