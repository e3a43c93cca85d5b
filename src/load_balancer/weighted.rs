//! Weighted round-robin load balancing strategy.
//!
//! A single running counter is mapped onto the cumulative weight ranges of
//! the candidates, so each endpoint receives `weight / total_weight` of the
//! traffic without materialising a repeated list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, request::BalanceRequest, Selector};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    counter: AtomicU64,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for WeightedRoundRobin {
    fn next_endpoint(
        &self,
        candidates: &[Arc<Endpoint>],
        _request: &BalanceRequest,
    ) -> Option<Arc<Endpoint>> {
        let total: u64 = candidates.iter().map(|e| u64::from(e.weight.max(1))).sum();
        if total == 0 {
            return None;
        }

        let slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        let mut accumulated = 0u64;
        for endpoint in candidates {
            accumulated += u64::from(endpoint.weight.max(1));
            if slot < accumulated {
                return Some(endpoint.clone());
            }
        }

        candidates.last().cloned()
    }
}
