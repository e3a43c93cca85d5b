//! Error taxonomy for the balancer.
//!
//! Only genuinely exceptional conditions live here. "No endpoint available"
//! is a normal outcome of balancing and is modelled by
//! [`BalanceOutcome`](crate::load_balancer::coordinator::BalanceOutcome).

use thiserror::Error;

use crate::store::StoreError;

/// A single rejected field on an endpoint registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("endpoint url must not be empty")]
    EmptyUrl,

    #[error("endpoint url '{0}' is not a valid host")]
    InvalidUrl(String),

    #[error("port {0} out of range [1, 65535]")]
    Port(u32),

    #[error("weight {0} out of range [1, 100]")]
    Weight(u32),

    #[error("max_connections {0} out of range [1, 10000]")]
    MaxConnections(u32),

    #[error("health check path '{0}' must start with '/'")]
    HealthCheckPath(String),

    #[error("health check interval {0}s must be at least 1s")]
    HealthCheckInterval(u64),
}

/// Errors surfaced by the balancing façade.
#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("invalid registration: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("endpoint '{0}' is already registered")]
    DuplicateId(String),

    #[error("endpoint '{0}' not found")]
    NotFound(String),

    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("ip_hash selection requires a client IP")]
    MissingClientIp,

    #[error("endpoint store error: {0}")]
    Store(#[from] StoreError),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for balancer operations.
pub type BalanceResult<T> = Result<T, BalanceError>;
