//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, page sizes ordered)
//! - Check that addresses and connection strings parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{GatewayConfig, StoreBackend};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("database.url is required for the postgres backend")]
    MissingDatabaseUrl,

    #[error("database.url is not a postgres connection string: {0}")]
    InvalidDatabaseUrl(String),

    #[error("rpc.default_page_size ({default}) exceeds rpc.max_page_size ({max})")]
    PageSizeOrder { default: u32, max: u32 },

    #[error("observability.log_level: unknown level {0:?}")]
    InvalidLogLevel(String),
}

/// Validate a fully merged configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(dial) = &config.console.dial_address {
        check_addr(&mut errors, "console.dial_address", dial);
    }
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let positive: [(&'static str, u64); 8] = [
        ("mux.read_timeout_ms", config.mux.read_timeout_ms),
        ("mux.max_prefix_bytes", config.mux.max_prefix_bytes as u64),
        ("mux.queue_capacity", config.mux.queue_capacity as u64),
        ("mux.max_pending", config.mux.max_pending as u64),
        ("rpc.max_page_size", u64::from(config.rpc.max_page_size)),
        ("rpc.request_timeout_secs", config.rpc.request_timeout_secs),
        ("console.dial_timeout_secs", config.console.dial_timeout_secs),
        ("console.request_timeout_secs", config.console.request_timeout_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.rpc.default_page_size > config.rpc.max_page_size {
        errors.push(ValidationError::PageSizeOrder {
            default: config.rpc.default_page_size,
            max: config.rpc.max_page_size,
        });
    }

    if config.database.backend == StoreBackend::Postgres {
        if config.database.url.is_empty() {
            errors.push(ValidationError::MissingDatabaseUrl);
        } else {
            match url::Url::parse(&config.database.url) {
                Ok(url) if matches!(url.scheme(), "postgres" | "postgresql") => {}
                Ok(url) => errors.push(ValidationError::InvalidDatabaseUrl(format!(
                    "unsupported scheme {:?}",
                    url.scheme()
                ))),
                Err(e) => errors.push(ValidationError::InvalidDatabaseUrl(e.to_string())),
            }
        }
        if config.database.max_connections == 0 {
            errors.push(ValidationError::Zero {
                field: "database.max_connections",
            });
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.database.backend = StoreBackend::Memory;
        config
    }

    #[test]
    fn defaults_with_memory_backend_are_valid() {
        assert!(validate_config(&memory_config()).is_ok());
    }

    #[test]
    fn postgres_backend_requires_url() {
        let config = GatewayConfig::default();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingDatabaseUrl]);
    }

    #[test]
    fn rejects_non_postgres_url() {
        let mut config = GatewayConfig::default();
        config.database.url = "mysql://localhost/db".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidDatabaseUrl(_)));
    }

    #[test]
    fn collects_every_error() {
        let mut config = memory_config();
        config.listener.bind_address = "not-an-address".into();
        config.mux.read_timeout_ms = 0;
        config.rpc.default_page_size = 5_000;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::Zero {
            field: "mux.read_timeout_ms"
        }));
    }
}
