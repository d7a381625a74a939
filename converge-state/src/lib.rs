//! Converge State Management
//!
//! Durable backends for the resource store of `converge-core`.
//!
//! # Overview
//!
//! - **LocalBackend**: the snapshot as an indented JSON file (default: converge.state.json)
//! - **MemoryBackend**: in-process snapshot shared between clones, from `converge-core`
//! - **BackendConfig**: backend type plus attributes, turned into a backend by [`create_backend`]
//!
//! # Example
//!
//! ```ignore
//! use converge_state::{create_backend, BackendConfig};
//! use converge_core::ResourceStore;
//!
//! let config = BackendConfig::local("infra/converge.state.json");
//! let store = ResourceStore::new(create_backend(&config)?);
//! ```

pub mod backends;
pub mod config;

pub use backends::{LocalBackend, create_backend};
pub use config::BackendConfig;
pub use converge_core::backend::{BackendError, BackendResult, Snapshot, StateBackend};
