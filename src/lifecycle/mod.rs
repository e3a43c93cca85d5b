//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → every subscribed task leaves its loop
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → main triggers shutdown
//!
//! Reload (reload.rs):
//!     ConfigWatcher update → algorithms, health settings, new endpoints
//! ```

pub mod reload;
pub mod shutdown;
pub mod signals;

pub use reload::apply_reload;
pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown_signal;
