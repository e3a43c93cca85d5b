//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::BalancerServiceConfig;
use crate::config::validation::validate_config;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<BalancerServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<BalancerServiceConfig, ConfigError> {
    let config: BalancerServiceConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoint::Protocol;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[balancer]
default_algorithm = "least_connections"
unmeasured_response_time_ms = 250

[balancer.service_algorithms]
sessions = "ip_hash"

[health_check]
timeout_secs = 2
unhealthy_threshold = 3

[[endpoints]]
id = "checkout-1"
service_name = "checkout"
url = "10.0.0.1"
port = 8080
weight = 3

[[endpoints]]
service_name = "checkout"
url = "10.0.0.2"
port = 8443
protocol = "https"
health_check_path = "/ready"
health_check_interval_secs = 10
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.balancer.default_algorithm, "least_connections");
        assert_eq!(config.balancer.unmeasured_response_time_ms, 250);
        assert_eq!(config.balancer.service_algorithms["sessions"], "ip_hash");
        assert_eq!(config.health_check.timeout_secs, 2);
        assert_eq!(config.health_check.unhealthy_threshold, 3);
        assert_eq!(config.health_check.healthy_threshold, 1);
        assert_eq!(config.endpoints.len(), 2);

        let first = &config.endpoints[0];
        assert_eq!(first.id.as_deref(), Some("checkout-1"));
        assert_eq!(first.weight, 3);
        assert_eq!(first.health_check_path, "/health");
        assert_eq!(first.health_check_interval_secs, 30);

        let second = &config.endpoints[1];
        assert_eq!(second.id, None);
        assert_eq!(second.protocol, Protocol::Https);
        assert_eq!(second.max_connections, 100);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.balancer.default_algorithm, "round_robin");
        assert!(config.health_check.enabled);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_validation_error_surfaces() {
        let err = parse_config("[balancer]\ndefault_algorithm = \"random\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
    }

    #[test]
    fn test_parse_error_surfaces() {
        assert!(matches!(parse_config("[balancer"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.endpoints.len(), 2);

        assert!(matches!(
            load_config(Path::new("/definitely/not/here.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
