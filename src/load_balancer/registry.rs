//! Endpoint registry.
//!
//! # Responsibilities
//! - Catalog endpoints grouped by service name, in registration order
//! - Own per-service selection state (cursors, default algorithm)
//! - Safe concurrent mutation of runtime counters
//!
//! Service groups live in a sharded map and each group's endpoint list is a
//! copy-on-write snapshot, so selection on one service never waits on
//! registration or probing of another.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{BalanceError, BalanceResult};
use crate::load_balancer::endpoint::{Endpoint, EndpointSpec};
use crate::load_balancer::{Algorithm, Selector, SelectorSet};

/// No per-service algorithm configured.
const INHERIT: u8 = u8::MAX;

/// Endpoints sharing a service name plus their selection state.
#[derive(Debug)]
pub struct ServiceGroup {
    pub name: String,
    endpoints: ArcSwap<Vec<Arc<Endpoint>>>,
    algorithm: AtomicU8,
    selectors: SelectorSet,
}

impl ServiceGroup {
    fn new(name: String, unmeasured_response_time_ms: u64) -> Self {
        Self {
            name,
            endpoints: ArcSwap::from_pointee(Vec::new()),
            algorithm: AtomicU8::new(INHERIT),
            selectors: SelectorSet::new(unmeasured_response_time_ms),
        }
    }

    /// All endpoints in registration order.
    pub fn endpoints(&self) -> Arc<Vec<Arc<Endpoint>>> {
        self.endpoints.load_full()
    }

    /// Active and healthy endpoints, in registration order.
    pub fn candidates(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .load()
            .iter()
            .filter(|e| e.is_selectable())
            .cloned()
            .collect()
    }

    /// The service's own default algorithm, if one was set.
    pub fn algorithm(&self) -> Option<Algorithm> {
        match self.algorithm.load(Ordering::Relaxed) {
            INHERIT => None,
            raw => Some(Algorithm::from(raw)),
        }
    }

    pub fn set_algorithm(&self, algorithm: Option<Algorithm>) {
        let raw = algorithm.map_or(INHERIT, |a| a as u8);
        self.algorithm.store(raw, Ordering::Relaxed);
    }

    pub fn selector(&self, algorithm: Algorithm) -> &dyn Selector {
        self.selectors.get(algorithm)
    }

    fn push(&self, endpoint: Arc<Endpoint>) {
        self.endpoints.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(endpoint.clone());
            next
        });
    }

    /// Remove this exact endpoint; a newer registration reusing its id stays.
    fn remove(&self, endpoint: &Arc<Endpoint>) {
        self.endpoints.rcu(|current| {
            current
                .iter()
                .filter(|e| !Arc::ptr_eq(e, endpoint))
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

/// Source of truth for which endpoints exist per service.
#[derive(Debug)]
pub struct Registry {
    groups: DashMap<String, Arc<ServiceGroup>>,
    index: DashMap<String, Arc<Endpoint>>,
    unmeasured_response_time_ms: u64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Registry {
    pub fn new(unmeasured_response_time_ms: u64) -> Self {
        Self {
            groups: DashMap::new(),
            index: DashMap::new(),
            unmeasured_response_time_ms,
        }
    }

    /// Validate and add an endpoint to its service group.
    pub fn register(&self, spec: &EndpointSpec) -> BalanceResult<Arc<Endpoint>> {
        spec.validate().map_err(BalanceError::Validation)?;

        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", spec.service_name, Uuid::new_v4().simple()));
        let endpoint = Arc::new(Endpoint::new(id.clone(), spec));

        // The group push happens under the index entry lock, so an unregister
        // of the same id sees either nothing or the fully registered endpoint.
        match self.index.entry(id.clone()) {
            Entry::Occupied(_) => return Err(BalanceError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                self.group_or_create(&spec.service_name).push(endpoint.clone());
                slot.insert(endpoint.clone());
            }
        }

        tracing::info!(
            service = %endpoint.service_name,
            endpoint = %endpoint.id,
            address = %endpoint.address(),
            weight = endpoint.weight,
            "Endpoint registered"
        );
        Ok(endpoint)
    }

    /// Deactivate and remove an endpoint.
    ///
    /// Holders of the returned `Arc` (in-flight requests) may still decrement
    /// its counter; it will never be selected again.
    pub fn unregister(&self, id: &str) -> BalanceResult<Arc<Endpoint>> {
        let (_, endpoint) = self
            .index
            .remove(id)
            .ok_or_else(|| BalanceError::NotFound(id.to_string()))?;
        endpoint.deactivate();

        if let Some(group) = self.group(&endpoint.service_name) {
            group.remove(&endpoint);
        }

        tracing::info!(
            service = %endpoint.service_name,
            endpoint = %endpoint.id,
            in_flight = endpoint.connections(),
            "Endpoint unregistered"
        );
        Ok(endpoint)
    }

    /// Endpoints of a service; empty for unknown services.
    pub fn list_endpoints(&self, service_name: &str) -> Vec<Arc<Endpoint>> {
        self.group(service_name)
            .map(|g| g.endpoints().as_ref().clone())
            .unwrap_or_default()
    }

    pub fn get_endpoint(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.index.get(id).map(|e| e.value().clone())
    }

    /// No-op for unknown ids.
    pub fn increment_connections(&self, id: &str) {
        if let Some(endpoint) = self.get_endpoint(id) {
            endpoint.inc_connections();
        }
    }

    /// No-op for unknown ids, tolerating races with unregister.
    pub fn decrement_connections(&self, id: &str) {
        if let Some(endpoint) = self.get_endpoint(id) {
            endpoint.dec_connections();
        }
    }

    pub fn group(&self, service_name: &str) -> Option<Arc<ServiceGroup>> {
        self.groups.get(service_name).map(|g| g.value().clone())
    }

    /// Get a group, creating an empty one if needed.
    pub fn group_or_create(&self, service_name: &str) -> Arc<ServiceGroup> {
        self.groups
            .entry(service_name.to_string())
            .or_insert_with(|| {
                Arc::new(ServiceGroup::new(
                    service_name.to_string(),
                    self.unmeasured_response_time_ms,
                ))
            })
            .value()
            .clone()
    }

    pub fn groups(&self) -> Vec<Arc<ServiceGroup>> {
        self.groups.iter().map(|g| g.value().clone()).collect()
    }

    /// Return a list of all endpoints (for health checking).
    pub fn all_endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.index.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    fn spec(id: &str, service: &str) -> EndpointSpec {
        EndpointSpec::new(service, "127.0.0.1", 8080).with_id(id)
    }

    #[test]
    fn test_register_keeps_insertion_order() {
        let registry = Registry::default();
        for id in ["a", "b", "c"] {
            registry.register(&spec(id, "checkout")).unwrap();
        }
        let ids: Vec<_> = registry
            .list_endpoints("checkout")
            .iter()
            .map(|e| e.id.clone())
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = Registry::default();
        registry.register(&spec("a", "checkout")).unwrap();
        let err = registry.register(&spec("a", "billing")).unwrap_err();
        assert!(matches!(err, BalanceError::DuplicateId(id) if id == "a"));
        assert!(registry.list_endpoints("billing").is_empty());
    }

    #[test]
    fn test_invalid_spec_creates_nothing() {
        let registry = Registry::default();
        let err = registry
            .register(&EndpointSpec::new("checkout", "127.0.0.1", 70000))
            .unwrap_err();
        assert!(matches!(
            err,
            BalanceError::Validation(ref errors) if errors == &[ValidationError::Port(70000)]
        ));
        assert!(registry.is_empty());
        assert!(registry.group("checkout").is_none());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let registry = Registry::default();
        let a = registry.register(&EndpointSpec::new("svc", "10.0.0.1", 80)).unwrap();
        let b = registry.register(&EndpointSpec::new("svc", "10.0.0.1", 80)).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("svc-"));
    }

    #[test]
    fn test_unknown_service_is_empty() {
        let registry = Registry::default();
        assert!(registry.list_endpoints("nope").is_empty());
        assert!(registry.get_endpoint("nope").is_none());
    }

    #[test]
    fn test_unregister_deactivates_and_removes() {
        let registry = Registry::default();
        let endpoint = registry.register(&spec("a", "checkout")).unwrap();
        registry.unregister("a").unwrap();

        assert!(!endpoint.is_active());
        assert!(registry.list_endpoints("checkout").is_empty());
        assert!(registry.get_endpoint("a").is_none());
        assert!(matches!(
            registry.unregister("a"),
            Err(BalanceError::NotFound(id)) if id == "a"
        ));
    }

    #[test]
    fn test_counters_on_missing_endpoint_are_noops() {
        let registry = Registry::default();
        registry.increment_connections("ghost");
        registry.decrement_connections("ghost");

        let endpoint = registry.register(&spec("a", "checkout")).unwrap();
        registry.increment_connections("a");
        registry.unregister("a").unwrap();
        registry.decrement_connections("a");
        assert_eq!(endpoint.connections(), 1);
    }

    #[test]
    fn test_candidates_filter_unhealthy() {
        let registry = Registry::default();
        registry.register(&spec("a", "checkout")).unwrap();
        let b = registry.register(&spec("b", "checkout")).unwrap();
        b.mark_failure(1, "refused".into());

        let group = registry.group("checkout").unwrap();
        let ids: Vec<_> = group.candidates().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, ["a"]);
    }

    #[test]
    fn test_group_algorithm_override() {
        let registry = Registry::default();
        let group = registry.group_or_create("checkout");
        assert_eq!(group.algorithm(), None);
        group.set_algorithm(Some(Algorithm::IpHash));
        assert_eq!(registry.group("checkout").unwrap().algorithm(), Some(Algorithm::IpHash));
        group.set_algorithm(None);
        assert_eq!(group.algorithm(), None);
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(Registry::default());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        registry
                            .register(&spec(&format!("t{t}-{i}"), "svc"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.list_endpoints("svc").len(), 200);
        assert_eq!(registry.len(), 200);
    }

    #[test]
    fn test_concurrent_register_unregister_leaves_no_inactive_entries() {
        let registry = Arc::new(Registry::default());
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if worker % 2 == 0 {
                            let _ = registry.register(&spec("flappy", "checkout"));
                        } else {
                            let _ = registry.unregister("flappy");
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let listed = registry.list_endpoints("checkout");
        assert!(listed.iter().all(|e| e.is_active()));
        assert_eq!(listed.len(), registry.len());
    }
}
