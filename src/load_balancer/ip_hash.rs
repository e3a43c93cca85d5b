//! Client IP hash strategy (session affinity).
//!
//! Uses FNV-1a over the address octets, which does not depend on process
//! state, so a client keeps reaching the same slot across requests and
//! restarts as long as the candidate list is unchanged.

use std::net::IpAddr;
use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, request::BalanceRequest, Selector};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Default)]
pub struct IpHash;

impl IpHash {
    pub fn new() -> Self {
        Self
    }
}

/// Stable 64-bit hash of an IP address.
pub fn hash_ip(ip: &IpAddr) -> u64 {
    let octets: Vec<u8> = match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    octets.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

impl Selector for IpHash {
    fn next_endpoint(
        &self,
        candidates: &[Arc<Endpoint>],
        request: &BalanceRequest,
    ) -> Option<Arc<Endpoint>> {
        if candidates.is_empty() {
            return None;
        }

        // Without a client IP there is nothing to be sticky on.
        let index = match &request.client_ip {
            Some(ip) => (hash_ip(ip) % candidates.len() as u64) as usize,
            None => 0,
        };
        candidates.get(index).cloned()
    }
}
