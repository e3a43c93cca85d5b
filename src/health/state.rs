//! Endpoint health state machine.
//!
//! # States
//! - Unknown: never probed; optimistically receives traffic
//! - Healthy: last probes succeeded
//! - Unhealthy: excluded from selection until probes recover
//!
//! # State Transitions
//! ```text
//! Unknown/Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unknown/Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! Only the prober drives these transitions. Administrative enable/disable is
//! a separate flag on the endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl HealthState {
    /// Unknown endpoints are treated as healthy until a probe says otherwise.
    pub fn is_healthy(self) -> bool {
        self != HealthState::Unhealthy
    }
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Result of a single health probe against one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub endpoint_id: String,
    /// Health of the endpoint after this probe was applied.
    pub is_healthy: bool,
    pub response_time_ms: u64,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Whether the probe itself succeeded (independent of hysteresis).
    pub fn probe_succeeded(&self) -> bool {
        self.error_message.is_none()
    }
}
