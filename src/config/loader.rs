//! Configuration loading from disk and the environment.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding the listening port.
pub const PORT_ENV: &str = "PORT";
/// Environment variables carrying the Postgres connection string, in priority order.
pub const DATABASE_URL_ENVS: [&str; 2] = ["POSTGRES_URL", "DATABASE_URL"];
/// Environment variable overriding the log level.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{var}={value:?} is not valid: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML configuration file. Missing sections fall back to defaults.
pub fn read_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Apply environment overrides using `lookup` to resolve variables.
///
/// Taking the lookup as a parameter keeps this testable without touching the
/// process environment.
pub fn apply_env<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup(PORT_ENV).filter(|v| !v.is_empty()) {
        let parsed: u16 = port.parse().map_err(|e: std::num::ParseIntError| ConfigError::Env {
            var: PORT_ENV,
            value: port.clone(),
            reason: e.to_string(),
        })?;
        config.listener.bind_address = with_port(&config.listener.bind_address, parsed);
    }

    if let Some(url) = DATABASE_URL_ENVS
        .iter()
        .filter_map(|var| lookup(var))
        .find(|v| !v.is_empty())
    {
        config.database.url = url;
    }

    if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|v| !v.is_empty()) {
        config.observability.log_level = level;
    }

    Ok(())
}

/// Run semantic validation and hand back the accepted configuration.
pub fn finalize(config: GatewayConfig) -> Result<GatewayConfig, ConfigError> {
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load defaults or `path`, apply the process environment and validate.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => GatewayConfig::default(),
    };
    apply_env(&mut config, |var| std::env::var(var).ok())?;
    finalize(config)
}

/// Replace the port of `bind_address`, keeping its host.
fn with_port(bind_address: &str, port: u16) -> String {
    match bind_address.parse::<SocketAddr>() {
        Ok(mut addr) => {
            addr.set_port(port);
            addr.to_string()
        }
        Err(_) => format!("0.0.0.0:{port}"),
    }
}
