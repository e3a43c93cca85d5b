//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, request::BalanceRequest, Selector};

/// Round-robin selector.
/// Stores an internal counter to rotate through endpoints.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobin {
    fn next_endpoint(
        &self,
        candidates: &[Arc<Endpoint>],
        _request: &BalanceRequest,
    ) -> Option<Arc<Endpoint>> {
        if candidates.is_empty() {
            return None;
        }

        // Every caller gets its own ticket; fairness under contention is best-effort.
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        candidates.get(ticket % candidates.len()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::endpoints;
    use std::collections::HashSet;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let backends = endpoints(&[1, 1]);
        let req = BalanceRequest::new("svc");

        let s1 = lb.next_endpoint(&backends, &req).unwrap();
        assert_eq!(s1.id, "e1");

        let s2 = lb.next_endpoint(&backends, &req).unwrap();
        assert_eq!(s2.id, "e2");

        let s3 = lb.next_endpoint(&backends, &req).unwrap();
        assert_eq!(s3.id, "e1");
    }

    #[test]
    fn test_each_endpoint_once_per_cycle() {
        let lb = RoundRobin::new();
        let req = BalanceRequest::new("svc");
        for n in 1..=7 {
            let backends = endpoints(&vec![1; n]);
            // Start the cycle at an arbitrary offset.
            lb.next_endpoint(&backends, &req);
            let seen: HashSet<String> = (0..n)
                .map(|_| lb.next_endpoint(&backends, &req).unwrap().id.clone())
                .collect();
            assert_eq!(seen.len(), n);
        }
    }

    #[test]
    fn test_empty_candidates() {
        let lb = RoundRobin::new();
        assert!(lb.next_endpoint(&[], &BalanceRequest::new("svc")).is_none());
    }

    #[test]
    fn test_concurrent_tickets_are_distinct() {
        let lb = Arc::new(RoundRobin::new());
        let backends = Arc::new(endpoints(&[1, 1, 1, 1]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lb = lb.clone();
                let backends = backends.clone();
                std::thread::spawn(move || {
                    let req = BalanceRequest::new("svc");
                    (0..100)
                        .map(|_| lb.next_endpoint(&backends, &req).unwrap().id.clone())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        // 400 tickets over 4 endpoints land exactly 100 each.
        assert!(counts.values().all(|c| *c == 100), "counts: {:?}", counts);
    }
}
