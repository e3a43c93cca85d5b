//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint of a service
//! - Track active connections (for Least Connections)
//! - Track health state and last observed response time
//! - Carry the administrative active flag used by unregister

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;
use crate::health::state::HealthState;

/// Sentinel for "no response time measured yet".
const NO_MEASUREMENT: u64 = u64::MAX;

/// Transport used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Tcp,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Registration input for an endpoint.
///
/// Numeric fields are wide on purpose so out-of-range input can be reported
/// instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Caller-chosen id; one is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub service_name: String,
    pub url: String,
    pub port: u32,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

fn default_weight() -> u32 {
    1
}

fn default_max_connections() -> u32 {
    100
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_health_check_interval() -> u64 {
    30
}

impl EndpointSpec {
    /// Registration with defaults for everything but the address.
    pub fn new(service_name: impl Into<String>, url: impl Into<String>, port: u32) -> Self {
        Self {
            id: None,
            service_name: service_name.into(),
            url: url.into(),
            port,
            protocol: Protocol::default(),
            weight: default_weight(),
            max_connections: default_max_connections(),
            health_check_path: default_health_check_path(),
            health_check_interval_secs: default_health_check_interval(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn with_health_check(mut self, path: impl Into<String>, interval_secs: u64) -> Self {
        self.health_check_path = path.into();
        self.health_check_interval_secs = interval_secs;
        self
    }

    /// Check every field and return all problems found.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.service_name.trim().is_empty() {
            errors.push(ValidationError::EmptyServiceName);
        }
        if self.url.trim().is_empty() {
            errors.push(ValidationError::EmptyUrl);
        } else if base_url(self.protocol, &self.url, 1).is_none() {
            errors.push(ValidationError::InvalidUrl(self.url.clone()));
        }
        if !(1..=65535).contains(&self.port) {
            errors.push(ValidationError::Port(self.port));
        }
        if !(1..=100).contains(&self.weight) {
            errors.push(ValidationError::Weight(self.weight));
        }
        if !(1..=10_000).contains(&self.max_connections) {
            errors.push(ValidationError::MaxConnections(self.max_connections));
        }
        // "//host/..." would be read as a network-path reference to another host.
        if !self.health_check_path.starts_with('/') || self.health_check_path.starts_with("//") {
            errors.push(ValidationError::HealthCheckPath(self.health_check_path.clone()));
        }
        if self.health_check_interval_secs == 0 {
            errors.push(ValidationError::HealthCheckInterval(self.health_check_interval_secs));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn base_url(protocol: Protocol, host: &str, port: u16) -> Option<Url> {
    let url = Url::parse(&format!("{}://{}:{}", protocol.scheme(), host, port)).ok()?;
    if url.host_str().is_some() && url.path().trim_start_matches('/').is_empty() {
        Some(url)
    } else {
        None
    }
}

/// A single backend endpoint.
#[derive(Debug)]
pub struct Endpoint {
    /// Unique, immutable identifier.
    pub id: String,
    /// Service group this endpoint belongs to.
    pub service_name: String,
    pub url: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Relative share for weighted round robin (1..=100).
    pub weight: u32,
    /// Soft cap used to compute the load factor.
    pub max_connections: u32,
    pub health_check_path: String,
    pub health_check_interval: Duration,
    pub registered_at: DateTime<Utc>,

    active: AtomicBool,
    state: AtomicU8,
    connections: AtomicUsize,
    last_response_ms: AtomicU64,
    /// Millis since epoch of the last probe, 0 when never probed.
    last_check_ms: AtomicI64,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl Endpoint {
    /// Build an endpoint from a validated spec.
    pub fn new(id: String, spec: &EndpointSpec) -> Self {
        Self {
            id,
            service_name: spec.service_name.clone(),
            url: spec.url.clone(),
            port: u16::try_from(spec.port).unwrap_or(u16::MAX),
            protocol: spec.protocol,
            weight: spec.weight.max(1),
            max_connections: spec.max_connections.max(1),
            health_check_path: spec.health_check_path.clone(),
            health_check_interval: Duration::from_secs(spec.health_check_interval_secs.max(1)),
            registered_at: Utc::now(),
            active: AtomicBool::new(true),
            state: AtomicU8::new(HealthState::Unknown as u8),
            connections: AtomicUsize::new(0),
            last_response_ms: AtomicU64::new(NO_MEASUREMENT),
            last_check_ms: AtomicI64::new(0),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Registration that re-creates this endpoint (used for persistence).
    pub fn spec(&self) -> EndpointSpec {
        EndpointSpec {
            id: Some(self.id.clone()),
            service_name: self.service_name.clone(),
            url: self.url.clone(),
            port: u32::from(self.port),
            protocol: self.protocol,
            weight: self.weight,
            max_connections: self.max_connections,
            health_check_path: self.health_check_path.clone(),
            health_check_interval_secs: self.health_check_interval.as_secs(),
        }
    }

    /// `protocol://url:port`
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.url, self.port)
    }

    /// Full URL of the health-check resource.
    ///
    /// The path only ever replaces the path and query of the endpoint's own
    /// address; host and port come from the registration.
    pub fn health_check_url(&self) -> Option<Url> {
        let mut url = base_url(self.protocol, &self.url, self.port)?;
        let (path, query) = match self.health_check_path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.health_check_path.as_str(), None),
        };
        url.set_path(path);
        url.set_query(query);
        Some(url)
    }

    // --- Administrative state ---

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Permanently exclude this endpoint from selection.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Active and not known to be unhealthy.
    pub fn is_selectable(&self) -> bool {
        self.is_active() && self.is_healthy()
    }

    // --- Connections ---

    /// Get the current number of active connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count, never below zero.
    pub fn dec_connections(&self) {
        let _ = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1));
    }

    /// Increment the connection count and return a guard that gives it back on drop.
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        self.inc_connections();
        ConnectionGuard {
            endpoint: self.clone(),
        }
    }

    /// `connections / max_connections`; may exceed 1.0 since the cap is soft.
    pub fn load_factor(&self) -> f64 {
        self.connections() as f64 / f64::from(self.max_connections)
    }

    // --- Response time ---

    pub fn last_response_time_ms(&self) -> Option<u64> {
        match self.last_response_ms.load(Ordering::Relaxed) {
            NO_MEASUREMENT => None,
            ms => Some(ms),
        }
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(NO_MEASUREMENT - 1);
        self.last_response_ms
            .store(ms.min(NO_MEASUREMENT - 1), Ordering::Relaxed);
    }

    /// 0.0 when unhealthy, otherwise decays with the last response time.
    pub fn health_score(&self) -> f64 {
        if !self.is_healthy() {
            return 0.0;
        }
        match self.last_response_time_ms() {
            Some(ms) => 1.0 / (1.0 + ms as f64 / 1000.0),
            None => 1.0,
        }
    }

    // --- Health Logic ---

    pub fn health_state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// Return true if endpoint is considered healthy (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.health_state().is_healthy()
    }

    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        match self.last_check_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Whether the endpoint's own probe interval has elapsed.
    pub fn probe_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_health_check() {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= self.health_check_interval)
                .unwrap_or(false),
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .expect("endpoint error mutex poisoned")
            .clone()
    }

    fn touch(&self, at: DateTime<Utc>) {
        self.last_check_ms
            .store(at.timestamp_millis().max(1), Ordering::Relaxed);
    }

    /// Report a successful probe. Returns the new state on a transition.
    pub fn mark_success(&self, healthy_threshold: usize, latency: Duration) -> Option<HealthState> {
        self.touch(Utc::now());
        self.record_response_time(latency);
        *self.last_error.lock().expect("endpoint error mutex poisoned") = None;
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.health_state() == HealthState::Healthy {
            return None;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold.max(1) {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.state.store(HealthState::Healthy as u8, Ordering::Release);
            return Some(HealthState::Healthy);
        }
        None
    }

    /// Report a failed probe. Returns the new state on a transition.
    pub fn mark_failure(&self, unhealthy_threshold: usize, error: String) -> Option<HealthState> {
        self.touch(Utc::now());
        *self.last_error.lock().expect("endpoint error mutex poisoned") = Some(error);
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.health_state() == HealthState::Unhealthy {
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold.max(1) {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.state.store(HealthState::Unhealthy as u8, Ordering::Release);
            return Some(HealthState::Unhealthy);
        }
        None
    }

    /// Serialisable view for operators.
    pub fn status(&self) -> EndpointStatus {
        EndpointStatus {
            id: self.id.clone(),
            service_name: self.service_name.clone(),
            address: self.address(),
            weight: self.weight,
            is_active: self.is_active(),
            health: self.health_state(),
            current_connections: self.connections(),
            max_connections: self.max_connections,
            last_response_time_ms: self.last_response_time_ms(),
            last_health_check: self.last_health_check(),
            last_error: self.last_error(),
        }
    }
}

/// Point-in-time view of an endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub id: String,
    pub service_name: String,
    pub address: String,
    pub weight: u32,
    pub is_active: bool,
    pub health: HealthState,
    pub current_connections: usize,
    pub max_connections: u32,
    pub last_response_time_ms: Option<u64>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    endpoint: Arc<Endpoint>,
}

impl Deref for ConnectionGuard {
    type Target = Endpoint;
    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.endpoint.dec_connections();
    }
}
