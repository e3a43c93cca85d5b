//! Balancing coordinator.
//!
//! # Responsibilities
//! - Resolve a service's endpoints and filter to active + healthy
//! - Resolve the algorithm (request override → service default → global default)
//! - Increment the chosen endpoint's connection count and record metrics
//! - Registration, unregistration and algorithm control for callers
//!
//! Selection is synchronous: it never awaits, so the connection increment and
//! the returned response cannot be separated by cancellation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::BalancerConfig;
use crate::error::{BalanceError, BalanceResult};
use crate::load_balancer::endpoint::{ConnectionGuard, Endpoint, EndpointSpec, EndpointStatus};
use crate::load_balancer::registry::{Registry, ServiceGroup};
use crate::load_balancer::request::{BalanceRequest, BalanceResponse};
use crate::load_balancer::Algorithm;
use crate::observability::metrics::{self, MetricsAggregator, MetricsSnapshot, Outcome};
use crate::store::EndpointStore;

/// Result of a balance call. Running out of capacity is not an error.
#[must_use]
#[derive(Debug, Clone)]
pub enum BalanceOutcome {
    Routed(BalanceResponse),
    NoAvailableEndpoints,
}

impl BalanceOutcome {
    pub fn is_routed(&self) -> bool {
        matches!(self, BalanceOutcome::Routed(_))
    }

    pub fn routed(self) -> Option<BalanceResponse> {
        match self {
            BalanceOutcome::Routed(response) => Some(response),
            BalanceOutcome::NoAvailableEndpoints => None,
        }
    }
}

/// A selected endpoint whose connection slot is released on drop.
#[derive(Debug)]
pub struct Lease {
    pub response: BalanceResponse,
    guard: ConnectionGuard,
    metrics: Arc<MetricsAggregator>,
}

impl Lease {
    pub fn endpoint(&self) -> &Endpoint {
        &self.guard
    }

    /// Report how the dispatched request went and release the slot.
    pub fn finish(self, success: bool, elapsed: Duration) {
        record_completion(&self.metrics, &self.guard, self.response.algorithm_used, success, elapsed);
    }
}

fn record_completion(
    aggregator: &MetricsAggregator,
    endpoint: &Endpoint,
    algorithm: Algorithm,
    success: bool,
    elapsed: Duration,
) {
    endpoint.record_response_time(elapsed);
    aggregator.record_latency(&endpoint.id, elapsed);
    aggregator.record_request(algorithm, &endpoint.service_name, completion_outcome(success));
}

fn completion_outcome(success: bool) -> Outcome {
    if success {
        Outcome::Succeeded
    } else {
        Outcome::Failed
    }
}

/// Summary returned by [`Balancer::get_metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct BalancerMetrics {
    pub total_services: usize,
    /// Services with at least one active, healthy endpoint.
    pub active_services: usize,
    pub total_endpoints: usize,
    pub healthy_endpoints: usize,
    pub current_algorithm: Algorithm,
    pub per_service_counts: BTreeMap<String, u64>,
    pub per_algorithm_counts: BTreeMap<String, u64>,
    pub details: MetricsSnapshot,
}

/// The façade callers balance through.
#[derive(Debug)]
pub struct Balancer {
    registry: Arc<Registry>,
    metrics: Arc<MetricsAggregator>,
    store: Arc<dyn EndpointStore>,
    default_algorithm: AtomicU8,
    /// Serializes registry + store mutations so the two never disagree.
    registration: Mutex<()>,
}

impl Balancer {
    pub fn new(
        registry: Arc<Registry>,
        metrics: Arc<MetricsAggregator>,
        store: Arc<dyn EndpointStore>,
        default_algorithm: Algorithm,
    ) -> Self {
        Self {
            registry,
            metrics,
            store,
            default_algorithm: AtomicU8::new(default_algorithm as u8),
            registration: Mutex::new(()),
        }
    }

    /// Build a balancer and apply the configured algorithms.
    pub fn from_config(config: &BalancerConfig, store: Arc<dyn EndpointStore>) -> BalanceResult<Self> {
        let default_algorithm = config.default_algorithm.parse()?;
        let balancer = Self::new(
            Arc::new(Registry::new(config.unmeasured_response_time_ms)),
            Arc::new(MetricsAggregator::new()),
            store,
            default_algorithm,
        );
        balancer.apply_config(config)?;
        Ok(balancer)
    }

    /// Re-apply the default and per-service algorithms.
    pub fn apply_config(&self, config: &BalancerConfig) -> BalanceResult<()> {
        self.set_default_algorithm(&config.default_algorithm)?;
        for (service, algorithm) in &config.service_algorithms {
            self.set_service_algorithm(service, Some(algorithm.as_str()))?;
        }
        Ok(())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    // --- Registration ---

    /// Register and persist an endpoint, returning its id.
    pub fn register_service(&self, spec: EndpointSpec) -> BalanceResult<String> {
        let _registration = self.registration.lock().expect("registration mutex poisoned");
        self.register_persisted(&spec)
    }

    /// Caller holds `registration`.
    fn register_persisted(&self, spec: &EndpointSpec) -> BalanceResult<String> {
        let endpoint = self.registry.register(spec)?;

        if let Err(e) = self.store.put(&endpoint.spec()) {
            tracing::error!(endpoint = %endpoint.id, error = %e, "Failed to persist endpoint, rolling back");
            let _ = self.registry.unregister(&endpoint.id);
            return Err(e.into());
        }

        metrics::record_endpoint_health(&endpoint.id, endpoint.is_healthy());
        Ok(endpoint.id.clone())
    }

    /// Unregister an endpoint. It is never selected again, even if probes recover.
    pub fn unregister_service(&self, endpoint_id: &str) -> BalanceResult<()> {
        let _registration = self.registration.lock().expect("registration mutex poisoned");
        let endpoint = self.registry.unregister(endpoint_id)?;
        self.metrics.remove_endpoint(&endpoint.id);

        if let Err(e) = self.store.remove(&endpoint.id) {
            tracing::warn!(endpoint = %endpoint.id, error = %e, "Failed to remove endpoint from store");
        }
        Ok(())
    }

    /// Register every persisted endpoint not already known. Returns how many were added.
    pub fn restore(&self) -> BalanceResult<usize> {
        let _registration = self.registration.lock().expect("registration mutex poisoned");
        let mut restored = 0;
        for spec in self.store.list_all()? {
            if let Some(id) = &spec.id {
                if self.registry.get_endpoint(id).is_some() {
                    continue;
                }
            }
            match self.registry.register(&spec) {
                Ok(_) => restored += 1,
                Err(e) => {
                    tracing::warn!(service = %spec.service_name, id = ?spec.id, error = %e, "Skipping persisted endpoint");
                }
            }
        }
        if restored > 0 {
            tracing::info!(count = restored, "Restored endpoints from store");
        }
        Ok(restored)
    }

    /// Register endpoints listed in configuration. Returns how many were added.
    ///
    /// An entry is skipped when its id is already registered or, without an id,
    /// when its service already has an endpoint at the same url, port and
    /// protocol. Restarts and reloads therefore never register it twice.
    pub fn register_static(&self, specs: &[EndpointSpec]) -> usize {
        let _registration = self.registration.lock().expect("registration mutex poisoned");
        let mut registered = 0;
        for spec in specs {
            let known = match &spec.id {
                Some(id) => self.registry.get_endpoint(id).is_some(),
                None => self
                    .registry
                    .list_endpoints(&spec.service_name)
                    .iter()
                    .any(|e| e.url == spec.url && u32::from(e.port) == spec.port && e.protocol == spec.protocol),
            };
            if known {
                continue;
            }
            match self.register_persisted(spec) {
                Ok(_) => registered += 1,
                Err(e) => tracing::error!(
                    service = %spec.service_name,
                    url = %spec.url,
                    error = %e,
                    "Failed to register configured endpoint"
                ),
            }
        }
        registered
    }

    // --- Balancing ---

    /// Pick an endpoint and count a connection against it.
    ///
    /// The caller must [`release`](Self::release) (or [`complete`](Self::complete))
    /// the endpoint when the dispatched request ends.
    pub fn balance_load(&self, request: &BalanceRequest) -> BalanceResult<BalanceOutcome> {
        let Some((endpoint, algorithm)) = self.route(request)? else {
            return Ok(BalanceOutcome::NoAvailableEndpoints);
        };

        endpoint.inc_connections();
        Ok(BalanceOutcome::Routed(self.respond(&endpoint, algorithm, request)))
    }

    /// Like [`balance_load`](Self::balance_load), but the connection is released
    /// when the returned lease is dropped or finished.
    pub fn acquire(&self, request: &BalanceRequest) -> BalanceResult<Option<Lease>> {
        let Some((endpoint, algorithm)) = self.route(request)? else {
            return Ok(None);
        };

        let guard = endpoint.acquire();
        let response = self.respond(&endpoint, algorithm, request);
        Ok(Some(Lease {
            response,
            guard,
            metrics: self.metrics.clone(),
        }))
    }

    /// Give back a connection taken by `balance_load`. No-op for unknown ids.
    pub fn release(&self, endpoint_id: &str) {
        self.registry.decrement_connections(endpoint_id);
        if let Some(endpoint) = self.registry.get_endpoint(endpoint_id) {
            metrics::record_endpoint_connections(&endpoint.id, endpoint.connections());
        }
    }

    /// Release a connection and record how the dispatched request went.
    ///
    /// If the endpoint was unregistered meanwhile only the service-level
    /// outcome is kept; its latency history is already gone.
    pub fn complete(&self, response: &BalanceResponse, success: bool, elapsed: Duration) {
        match self.registry.get_endpoint(&response.endpoint_id) {
            Some(endpoint) => {
                endpoint.dec_connections();
                record_completion(&self.metrics, &endpoint, response.algorithm_used, success, elapsed);
            }
            None => self.metrics.record_request(
                response.algorithm_used,
                &response.service_name,
                completion_outcome(success),
            ),
        }
    }

    fn resolve_algorithm(&self, request: &BalanceRequest, group: Option<&ServiceGroup>) -> Algorithm {
        request
            .algorithm
            .or_else(|| group.and_then(ServiceGroup::algorithm))
            .unwrap_or_else(|| self.default_algorithm())
    }

    fn route(&self, request: &BalanceRequest) -> BalanceResult<Option<(Arc<Endpoint>, Algorithm)>> {
        let group = self.registry.group(&request.service_name);
        let algorithm = self.resolve_algorithm(request, group.as_deref());

        let candidates = group.as_ref().map(|g| g.candidates()).unwrap_or_default();
        let chosen = match &group {
            Some(group) if !candidates.is_empty() => {
                if algorithm == Algorithm::IpHash && request.client_ip.is_none() {
                    self.metrics
                        .record_request(algorithm, &request.service_name, Outcome::Rejected);
                    tracing::debug!(service = %request.service_name, "ip_hash request without client IP");
                    return Err(BalanceError::MissingClientIp);
                }
                group.selector(algorithm).next_endpoint(&candidates, request)
            }
            _ => None,
        };

        match chosen {
            Some(endpoint) => {
                self.metrics
                    .record_request(algorithm, &request.service_name, Outcome::Routed);
                tracing::debug!(
                    service = %request.service_name,
                    algorithm = %algorithm,
                    endpoint = %endpoint.id,
                    candidates = candidates.len(),
                    "Endpoint selected"
                );
                Ok(Some((endpoint, algorithm)))
            }
            None => {
                self.metrics.record_request(
                    algorithm,
                    &request.service_name,
                    Outcome::NoAvailableEndpoints,
                );
                tracing::debug!(
                    service = %request.service_name,
                    registered = group.map_or(0, |g| g.endpoints().len()),
                    "No available endpoints"
                );
                Ok(None)
            }
        }
    }

    fn respond(&self, endpoint: &Endpoint, algorithm: Algorithm, request: &BalanceRequest) -> BalanceResponse {
        metrics::record_endpoint_connections(&endpoint.id, endpoint.connections());
        BalanceResponse {
            service_name: endpoint.service_name.clone(),
            endpoint_url: endpoint.address(),
            endpoint_id: endpoint.id.clone(),
            algorithm_used: algorithm,
            session_id: request
                .session_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            load_factor: endpoint.load_factor(),
            health_score: endpoint.health_score(),
            timestamp: Utc::now(),
        }
    }

    // --- Algorithm control ---

    pub fn default_algorithm(&self) -> Algorithm {
        Algorithm::from(self.default_algorithm.load(Ordering::Relaxed))
    }

    /// Set the global default by name.
    pub fn set_default_algorithm(&self, name: &str) -> BalanceResult<Algorithm> {
        let algorithm: Algorithm = name.parse()?;
        let previous = Algorithm::from(
            self.default_algorithm
                .swap(algorithm as u8, Ordering::Relaxed),
        );
        if previous != algorithm {
            tracing::info!(from = %previous, to = %algorithm, "Default algorithm changed");
        }
        Ok(algorithm)
    }

    /// Set (or clear with `None`) a service's own default algorithm.
    pub fn set_service_algorithm(&self, service_name: &str, name: Option<&str>) -> BalanceResult<()> {
        let algorithm = name.map(str::parse::<Algorithm>).transpose()?;
        self.registry
            .group_or_create(service_name)
            .set_algorithm(algorithm);
        tracing::info!(service = %service_name, algorithm = ?algorithm, "Service algorithm set");
        Ok(())
    }

    pub fn list_supported_algorithms() -> Vec<&'static str> {
        Algorithm::ALL.iter().map(|a| a.name()).collect()
    }

    // --- Reporting ---

    pub fn get_metrics(&self) -> BalancerMetrics {
        let groups = self.registry.groups();
        let details = self.metrics.snapshot();
        let endpoints = self.registry.all_endpoints();

        BalancerMetrics {
            total_services: groups.iter().filter(|g| !g.endpoints().is_empty()).count(),
            active_services: groups.iter().filter(|g| !g.candidates().is_empty()).count(),
            total_endpoints: endpoints.len(),
            healthy_endpoints: endpoints.iter().filter(|e| e.is_selectable()).count(),
            current_algorithm: self.default_algorithm(),
            per_service_counts: details
                .per_service
                .iter()
                .map(|(service, counts)| (service.clone(), counts.requests()))
                .collect(),
            per_algorithm_counts: details.per_algorithm.clone(),
            details,
        }
    }

    /// Operator view of endpoints, optionally limited to one service.
    pub fn endpoint_statuses(&self, service_name: Option<&str>) -> Vec<EndpointStatus> {
        let endpoints = match service_name {
            Some(name) => self.registry.list_endpoints(name),
            None => self
                .registry
                .groups()
                .iter()
                .flat_map(|g| g.endpoints().as_ref().clone())
                .collect(),
        };
        endpoints.iter().map(|e| e.status()).collect()
    }
}
