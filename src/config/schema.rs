//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::load_balancer::endpoint::EndpointSpec;

/// Root configuration for the balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerServiceConfig {
    /// Selection settings.
    pub balancer: BalancerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Endpoint persistence.
    pub store: StoreConfig,

    /// Statically registered endpoints.
    pub endpoints: Vec<EndpointSpec>,
}

/// Selection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Algorithm used when neither the request nor the service picks one.
    pub default_algorithm: String,

    /// Response time least-response-time assumes for unmeasured endpoints.
    /// `0` sends new endpoints traffic first.
    pub unmeasured_response_time_ms: u64,

    /// Per-service default algorithm (service name → algorithm name).
    pub service_algorithms: BTreeMap<String, String>,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            default_algorithm: "round_robin".to_string(),
            unmeasured_response_time_ms: 0,
            service_algorithms: BTreeMap::new(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// How often the prober looks for endpoints whose interval has elapsed.
    pub tick_millis: u64,

    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// User-Agent sent with HTTP probes.
    pub user_agent: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_millis: 1000,
            timeout_secs: 5,
            unhealthy_threshold: 1,
            healthy_threshold: 1,
            user_agent: concat!("service-balancer/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Endpoint persistence configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding registrations. In-memory only when unset.
    pub path: Option<String>,
}
