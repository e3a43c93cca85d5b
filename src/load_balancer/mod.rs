//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! BalanceRequest{service_name, algorithm?, client_ip?, session_id?}
//!     → coordinator.rs (façade)
//!     → registry.rs (endpoints of the service group)
//!     → filter to active + healthy
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through endpoints)
//!         - least_conn.rs (pick endpoint with fewest connections)
//!         - weighted.rs (rotate proportionally to weight)
//!         - least_time.rs (pick endpoint with lowest response time)
//!         - ip_hash.rs (stable client IP affinity)
//!     → endpoint.rs (increment connection count)
//!     → BalanceResponse or NoAvailableEndpoints
//! ```
//!
//! # Design Decisions
//! - Algorithms are a closed set selected by [`Algorithm`]
//! - Algorithms never touch connection counters; the coordinator does
//! - Cursor state is per service group, never shared across services
//! - Unhealthy and inactive endpoints are filtered before selection

pub mod coordinator;
pub mod endpoint;
pub mod ip_hash;
pub mod least_conn;
pub mod least_time;
pub mod registry;
pub mod request;
pub mod round_robin;
pub mod weighted;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BalanceError;
use crate::load_balancer::endpoint::Endpoint;
use crate::load_balancer::request::BalanceRequest;

pub use coordinator::{BalanceOutcome, Balancer, BalancerMetrics, Lease};
pub use endpoint::{ConnectionGuard, EndpointSpec, EndpointStatus, Protocol};
pub use registry::Registry;
pub use request::BalanceResponse;

/// A selection strategy over an already-filtered candidate list.
pub trait Selector: Send + Sync + fmt::Debug {
    /// Pick one candidate. Returns `None` only for an empty list.
    fn next_endpoint(
        &self,
        candidates: &[Arc<Endpoint>],
        request: &BalanceRequest,
    ) -> Option<Arc<Endpoint>>;
}

/// Supported balancing algorithms.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin = 0,
    LeastConnections = 1,
    WeightedRoundRobin = 2,
    LeastResponseTime = 3,
    IpHash = 4,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::RoundRobin,
        Algorithm::LeastConnections,
        Algorithm::WeightedRoundRobin,
        Algorithm::LeastResponseTime,
        Algorithm::IpHash,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::LeastConnections => "least_connections",
            Algorithm::WeightedRoundRobin => "weighted_round_robin",
            Algorithm::LeastResponseTime => "least_response_time",
            Algorithm::IpHash => "ip_hash",
        }
    }
}

impl From<u8> for Algorithm {
    fn from(val: u8) -> Self {
        match val {
            1 => Algorithm::LeastConnections,
            2 => Algorithm::WeightedRoundRobin,
            3 => Algorithm::LeastResponseTime,
            4 => Algorithm::IpHash,
            _ => Algorithm::RoundRobin,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = BalanceError;

    /// Accepts snake_case or kebab-case names, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Algorithm::ALL
            .into_iter()
            .find(|a| a.name() == normalized)
            .ok_or_else(|| BalanceError::UnsupportedAlgorithm(s.to_string()))
    }
}

/// One instance of every strategy, owned by a single service group.
#[derive(Debug)]
pub struct SelectorSet {
    round_robin: round_robin::RoundRobin,
    least_connections: least_conn::LeastConnections,
    weighted: weighted::WeightedRoundRobin,
    least_time: least_time::LeastResponseTime,
    ip_hash: ip_hash::IpHash,
}

impl SelectorSet {
    /// `unmeasured_response_time_ms` is what least-response-time assumes for
    /// endpoints that have not been measured yet.
    pub fn new(unmeasured_response_time_ms: u64) -> Self {
        Self {
            round_robin: round_robin::RoundRobin::new(),
            least_connections: least_conn::LeastConnections::new(),
            weighted: weighted::WeightedRoundRobin::new(),
            least_time: least_time::LeastResponseTime::new(unmeasured_response_time_ms),
            ip_hash: ip_hash::IpHash::new(),
        }
    }

    pub fn get(&self, algorithm: Algorithm) -> &dyn Selector {
        match algorithm {
            Algorithm::RoundRobin => &self.round_robin,
            Algorithm::LeastConnections => &self.least_connections,
            Algorithm::WeightedRoundRobin => &self.weighted,
            Algorithm::LeastResponseTime => &self.least_time,
            Algorithm::IpHash => &self.ip_hash,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn endpoints(weights: &[u32]) -> Vec<Arc<Endpoint>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let spec = EndpointSpec::new("svc", format!("10.0.0.{}", i + 1), 8080)
                    .with_weight(*w);
                Arc::new(Endpoint::new(format!("e{}", i + 1), &spec))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_algorithm_names() {
        assert_eq!("round_robin".parse::<Algorithm>().unwrap(), Algorithm::RoundRobin);
        assert_eq!("Least-Connections".parse::<Algorithm>().unwrap(), Algorithm::LeastConnections);
        assert_eq!("ip_hash".parse::<Algorithm>().unwrap(), Algorithm::IpHash);
        assert!(matches!(
            "random".parse::<Algorithm>(),
            Err(BalanceError::UnsupportedAlgorithm(name)) if name == "random"
        ));
    }

    #[test]
    fn test_u8_round_trip_covers_all() {
        for algorithm in Algorithm::ALL {
            assert_eq!(Algorithm::from(algorithm as u8), algorithm);
        }
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Algorithm::WeightedRoundRobin).unwrap();
        assert_eq!(json, "\"weighted_round_robin\"");
    }
}
