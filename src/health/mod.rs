//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic tick
//!     → Select endpoints whose own interval elapsed
//!     → Probe them concurrently (HTTP GET or TCP connect)
//!     → Update endpoint state and response time
//!
//! State machine (state.rs):
//!     Unknown → Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Probe failures change state only; they are never surfaced as errors
//! - Unknown endpoints stay selectable until the first failed probe
//! - Health state is per-endpoint, not per-service

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthReport, HealthState};
