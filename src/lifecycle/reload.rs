//! Applying a reloaded configuration to the running balancer.

use crate::config::BalancerServiceConfig;
use crate::health::HealthMonitor;
use crate::load_balancer::Balancer;

/// Apply algorithm settings, health check settings and newly listed endpoints.
///
/// Endpoints already registered stay untouched, as do endpoints that vanished
/// from the file. Returns how many endpoints were added.
pub fn apply_reload(balancer: &Balancer, monitor: &HealthMonitor, config: &BalancerServiceConfig) -> usize {
    if let Err(e) = balancer.apply_config(&config.balancer) {
        tracing::error!(error = %e, "Failed to apply balancer settings");
    }
    if *monitor.config() != config.health_check {
        monitor.update_config(config.health_check.clone());
    }

    let added = balancer.register_static(&config.endpoints);
    tracing::info!(
        default_algorithm = %balancer.default_algorithm(),
        added,
        "Configuration reloaded"
    );
    added
}
