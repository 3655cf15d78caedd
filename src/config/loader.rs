//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;
    finalize(config, |key| std::env::var(key).ok())
}

/// Validate the built-in defaults with environment overrides (no config file).
pub fn load_default() -> Result<ProxyConfig, ConfigError> {
    finalize(ProxyConfig::default(), |key| std::env::var(key).ok())
}

fn finalize<F>(mut config: ProxyConfig, env: F) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, env);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `SAP_*` environment overrides on top of the file values.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = env("SAP_STORE_HOST") {
        config.store.host = host;
    }
    if let Some(port) = env("SAP_STORE_PORT") {
        match port.parse() {
            Ok(port) => config.store.port = port,
            Err(_) => tracing::warn!(value = %port, "Ignoring invalid SAP_STORE_PORT"),
        }
    }
    if let Some(password) = env("SAP_STORE_PASSWORD") {
        config.store.password = Some(password);
    }
    if let Some(bind) = env("SAP_BIND_ADDRESS") {
        config.listener.bind_address = bind;
    }
    if let Some(backends) = env("SAP_BACKENDS") {
        config.upstream.backends = backends
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if config.store.password.as_deref() == Some("") {
        config.store.password = None;
    }
}
