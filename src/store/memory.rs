//! In-memory endpoint store.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::{EndpointStore, StoreError};
use crate::load_balancer::endpoint::EndpointSpec;

/// Non-durable store; lists come back in first-insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, (u64, EndpointSpec)>,
    seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(&self, filter: impl Fn(&EndpointSpec) -> bool) -> Vec<EndpointSpec> {
        let mut found: Vec<(u64, EndpointSpec)> = self
            .entries
            .iter()
            .filter(|e| filter(&e.value().1))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        found.into_iter().map(|(_, spec)| spec).collect()
    }
}

impl EndpointStore for MemoryStore {
    fn put(&self, spec: &EndpointSpec) -> Result<(), StoreError> {
        let id = spec.id.clone().ok_or(StoreError::MissingId)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.entries
            .entry(id)
            .and_modify(|(_, existing)| *existing = spec.clone())
            .or_insert_with(|| (seq, spec.clone()));
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<EndpointSpec>, StoreError> {
        Ok(self.entries.get(id).map(|e| e.value().1.clone()))
    }

    fn remove(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(id).is_some())
    }

    fn list(&self, service_name: &str) -> Result<Vec<EndpointSpec>, StoreError> {
        Ok(self.collect(|spec| spec.service_name == service_name))
    }

    fn list_all(&self) -> Result<Vec<EndpointSpec>, StoreError> {
        Ok(self.collect(|_| true))
    }
}
