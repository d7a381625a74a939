//! Backend implementations for state storage

mod local;

pub use local::LocalBackend;

use converge_core::backend::{BackendError, BackendResult, MemoryBackend, StateBackend};

use crate::config::BackendConfig;

/// Create a backend from configuration
///
/// This function dispatches to the appropriate backend implementation
/// based on the backend_type in the configuration.
pub fn create_backend(config: &BackendConfig) -> BackendResult<Box<dyn StateBackend>> {
    match config.backend_type.as_str() {
        "local" => Ok(Box::new(LocalBackend::from_config(config)?)),
        "memory" => Ok(Box::new(MemoryBackend::new())),
        other => Err(BackendError::unsupported_backend(other)),
    }
}
