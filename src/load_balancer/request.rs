//! Balance request and response value objects.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::load_balancer::Algorithm;

/// A request to pick an endpoint for a service. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceRequest {
    pub service_name: String,
    /// Overrides the service's default algorithm.
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
    /// Required for ip_hash.
    #[serde(default)]
    pub client_ip: Option<IpAddr>,
    /// Echoed back; generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BalanceRequest {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    #[must_use]
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The chosen endpoint plus a snapshot of its state at selection time.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub service_name: String,
    pub endpoint_url: String,
    pub endpoint_id: String,
    pub algorithm_used: Algorithm,
    pub session_id: String,
    pub load_factor: f64,
    pub health_score: f64,
    pub timestamp: DateTime<Utc>,
}
