//! Service load balancer library.
//!
//! Keeps a registry of backend endpoints grouped by service, probes their
//! health in the background and picks an endpoint per request with one of
//! five algorithms.

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod store;

pub use config::schema::BalancerServiceConfig;
pub use error::{BalanceError, BalanceResult, ValidationError};
pub use health::HealthMonitor;
pub use lifecycle::Shutdown;
pub use load_balancer::request::BalanceRequest;
pub use load_balancer::{Algorithm, BalanceOutcome, BalanceResponse, Balancer, EndpointSpec, Protocol};
