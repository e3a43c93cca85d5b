//! Least response time load balancing strategy.
//!
//! Endpoints that have never been measured are scored with a configurable
//! stand-in value. The default of `0` sends new endpoints traffic first so
//! they obtain a real measurement quickly.

use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, request::BalanceRequest, Selector};

#[derive(Debug, Default)]
pub struct LeastResponseTime {
    unmeasured_ms: u64,
}

impl LeastResponseTime {
    pub fn new(unmeasured_ms: u64) -> Self {
        Self { unmeasured_ms }
    }

    fn score(&self, endpoint: &Endpoint) -> u64 {
        endpoint
            .last_response_time_ms()
            .unwrap_or(self.unmeasured_ms)
    }
}

impl Selector for LeastResponseTime {
    fn next_endpoint(
        &self,
        candidates: &[Arc<Endpoint>],
        _request: &BalanceRequest,
    ) -> Option<Arc<Endpoint>> {
        candidates
            .iter()
            .min_by_key(|e| self.score(e))
            .cloned()
    }
}
