//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check algorithm names resolve to supported algorithms
//! - Validate value ranges (timeouts > 0, thresholds > 0, endpoint fields)
//! - Detect duplicate endpoint ids
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: config → Result<(), Vec<String>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::BalancerServiceConfig;
use crate::load_balancer::Algorithm;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &BalancerServiceConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.balancer.default_algorithm.parse::<Algorithm>().is_err() {
        errors.push(format!(
            "balancer.default_algorithm: unsupported algorithm '{}'",
            config.balancer.default_algorithm
        ));
    }
    for (service, algorithm) in &config.balancer.service_algorithms {
        if algorithm.parse::<Algorithm>().is_err() {
            errors.push(format!(
                "balancer.service_algorithms.{}: unsupported algorithm '{}'",
                service, algorithm
            ));
        }
    }

    let health = &config.health_check;
    if health.tick_millis == 0 {
        errors.push("health_check.tick_millis must be greater than 0".to_string());
    }
    if health.timeout_secs == 0 {
        errors.push("health_check.timeout_secs must be greater than 0".to_string());
    }
    if health.healthy_threshold == 0 {
        errors.push("health_check.healthy_threshold must be greater than 0".to_string());
    }
    if health.unhealthy_threshold == 0 {
        errors.push("health_check.unhealthy_threshold must be greater than 0".to_string());
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(format!(
            "observability.log_level: unknown level '{}'",
            observability.log_level
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "observability.metrics_address: '{}' is not a socket address",
            observability.metrics_address
        ));
    }

    let mut seen = HashSet::new();
    for (i, endpoint) in config.endpoints.iter().enumerate() {
        let label = endpoint
            .id
            .clone()
            .unwrap_or_else(|| format!("#{}", i));
        if let Some(id) = &endpoint.id {
            if !seen.insert(id.as_str()) {
                errors.push(format!("endpoints[{}]: duplicate id", label));
            }
        }
        if let Err(field_errors) = endpoint.validate() {
            errors.extend(
                field_errors
                    .into_iter()
                    .map(|e| format!("endpoints[{}]: {}", label, e)),
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
