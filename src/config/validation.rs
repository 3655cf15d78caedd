//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, value ranges and header names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    if config.upstream.backends.is_empty() {
        errors.push(ValidationError::new("upstream.backends", "at least one backend is required"));
    }
    for backend in &config.upstream.backends {
        if backend.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "upstream.backends",
                format!("'{}' is not a socket address", backend),
            ));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.timeouts.upstream_connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.upstream_connect_secs", "must be > 0"));
    }

    let store = &config.store;
    if store.host.is_empty() {
        errors.push(ValidationError::new("store.host", "must not be empty"));
    }
    for (field, value) in [
        ("store.connect_timeout_ms", store.connect_timeout_ms),
        ("store.command_timeout_ms", store.command_timeout_ms),
        ("store.idle_timeout_ms", store.idle_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if store.pool_size == 0 {
        errors.push(ValidationError::new("store.pool_size", "must be > 0"));
    }

    let session = &config.session;
    if session.ttl_secs == 0 {
        errors.push(ValidationError::new("session.ttl_secs", "must be > 0"));
    }
    if session.key_prefix.is_empty() {
        errors.push(ValidationError::new("session.key_prefix", "must not be empty"));
    }
    if session.cookie_name.is_empty() {
        errors.push(ValidationError::new("session.cookie_name", "must not be empty"));
    }
    for (field, value) in [
        ("session.id_header", &session.id_header),
        ("session.data_header", &session.data_header),
        ("session.mutation_header", &session.mutation_header),
    ] {
        if HeaderName::from_bytes(value.as_bytes()).is_err() {
            errors.push(ValidationError::new(field, format!("'{}' is not a valid header name", value)));
        }
    }

    if !config.management.path.starts_with('/') {
        errors.push(ValidationError::new("management.path", "must start with '/'"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
