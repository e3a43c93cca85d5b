//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, request::BalanceRequest, Selector};

/// Least connections selector.
/// Selects the endpoint with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl Selector for LeastConnections {
    fn next_endpoint(
        &self,
        candidates: &[Arc<Endpoint>],
        _request: &BalanceRequest,
    ) -> Option<Arc<Endpoint>> {
        // `min_by_key` keeps the first of equal minima, so ties go to list order.
        candidates
            .iter()
            .min_by_key(|e| e.connections())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::endpoints;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let backends = endpoints(&[1, 1]);
        let req = BalanceRequest::new("svc");

        // artificially increase connections on e1
        backends[0].inc_connections();

        // Should pick e2 (0 connections)
        let s1 = lb.next_endpoint(&backends, &req).unwrap();
        assert_eq!(s1.id, "e2");

        // increase e2
        backends[1].inc_connections();
        backends[1].inc_connections(); // now e2 has 2, e1 has 1

        // Should pick e1 (1 connection)
        let s2 = lb.next_endpoint(&backends, &req).unwrap();
        assert_eq!(s2.id, "e1");
    }

    #[test]
    fn test_ties_go_to_first() {
        let lb = LeastConnections::new();
        let backends = endpoints(&[1, 1, 1]);
        backends[0].inc_connections();
        let req = BalanceRequest::new("svc");
        assert_eq!(lb.next_endpoint(&backends, &req).unwrap().id, "e2");
    }

    #[test]
    fn test_empty_candidates() {
        assert!(LeastConnections::new()
            .next_endpoint(&[], &BalanceRequest::new("svc"))
            .is_none());
    }
}
