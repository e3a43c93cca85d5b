//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (in-process aggregates mirrored to Prometheus)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape, optional)
//!     → Balancer::get_metrics (snapshot)
//! ```
//!
//! # Design Decisions
//! - Metrics are cheap (atomic increments)
//! - The exporter is optional; aggregates are always kept

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsAggregator, MetricsSnapshot, Outcome};
