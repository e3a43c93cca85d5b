//! Durable endpoint registrations.
//!
//! The balancer only needs get/put/remove/list by service name, so the
//! backing store stays behind [`EndpointStore`]. Selection never reads it.

pub mod file;
pub mod memory;

use thiserror::Error;

use crate::load_balancer::endpoint::EndpointSpec;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("persisted endpoint has no id")]
    MissingId,
}

/// Persistence collaborator for endpoint registrations.
pub trait EndpointStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace by id.
    fn put(&self, spec: &EndpointSpec) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<EndpointSpec>, StoreError>;

    /// Returns whether something was removed.
    fn remove(&self, id: &str) -> Result<bool, StoreError>;

    fn list(&self, service_name: &str) -> Result<Vec<EndpointSpec>, StoreError>;

    fn list_all(&self) -> Result<Vec<EndpointSpec>, StoreError>;
}
