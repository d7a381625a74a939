//! Local file backend for state storage
//!
//! This backend stores the snapshot in a local JSON file (default:
//! converge.state.json). Each top-level key is an internal resource id and
//! each value is the decoded resource record, so the file stays readable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use converge_core::backend::{BackendError, BackendResult, Snapshot, StateBackend};
use converge_core::resource::ResourceId;

use crate::config::BackendConfig;

/// Local file backend for development and simple use cases
#[derive(Debug, Clone)]
pub struct LocalBackend {
    /// Path to the state file
    state_path: PathBuf,
}

impl LocalBackend {
    /// Default state file name
    pub const DEFAULT_STATE_FILE: &'static str = "converge.state.json";

    /// Create a new LocalBackend with the default path (converge.state.json in current directory)
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    /// Create a new LocalBackend with a specific state file path
    pub fn with_path(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
        }
    }

    /// Create a LocalBackend from configuration
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let path = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_STATE_FILE));

        if path.as_os_str().is_empty() {
            return Err(BackendError::configuration("local backend path is empty"));
        }

        Ok(Self::with_path(path))
    }

    /// Get the state file path
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn create_empty(&self) -> BackendResult<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::Io(format!("Failed to create state directory: {}", e)))?;
        }
        tokio::fs::write(&self.state_path, "{}")
            .await
            .map_err(|e| BackendError::Io(format!("Failed to create state file: {}", e)))?;
        log::info!("Created empty state file {}", self.state_path.display());
        Ok(())
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read(&self) -> BackendResult<Snapshot> {
        if !self.state_path.exists() {
            self.create_empty().await?;
            return Ok(Snapshot::new());
        }

        let content = tokio::fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to read state file: {}", e)))?;

        let records: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&content)
            .map_err(|e| {
                BackendError::InvalidState(format!("Failed to parse state file: {}", e))
            })?;

        records
            .into_iter()
            .map(|(id, record)| {
                let bytes = serde_json::to_vec(&record).map_err(|e| {
                    BackendError::Serialization(format!("Failed to encode record {}: {}", id, e))
                })?;
                Ok((ResourceId::new(id), bytes))
            })
            .collect()
    }

    async fn write(&self, snapshot: &Snapshot) -> BackendResult<()> {
        let mut records = serde_json::Map::new();
        for (id, bytes) in snapshot {
            let record: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
                BackendError::Serialization(format!("Record {} is not valid JSON: {}", id, e))
            })?;
            records.insert(id.to_string(), record);
        }

        let content = serde_json::to_string_pretty(&records).map_err(|e| {
            BackendError::Serialization(format!("Failed to serialize state: {}", e))
        })?;

        tokio::fs::write(&self.state_path, content)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;

        Ok(())
    }
}
