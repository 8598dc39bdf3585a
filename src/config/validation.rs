//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, addresses)
//! - Check static route and TLS settings are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.bind_addr must list at least one address")]
    NoBindAddress,
    #[error("invalid bind address '{0}'")]
    BadBindAddress(String),
    #[error("server.port must be non-zero")]
    ZeroPort,
    #[error("server.http_port must differ from server.port when TLS is enabled")]
    PortClash,
    #[error("static route '{0}' must start with '/'")]
    BadStaticRoute(String),
    #[error("session.secret is required when sessions are enabled")]
    MissingSessionSecret,
    #[error("server.rate_limit needs non-zero requests_per_second and burst")]
    BadRateLimit,
    #[error("app.{0} must not be empty")]
    EmptyTitle(&'static str),
}

/// Check a loaded configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let server = &config.server;

    if server.bind_addr.is_empty() {
        errors.push(ValidationError::NoBindAddress);
    }
    for addr in &server.bind_addr {
        if addr.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::BadBindAddress(addr.clone()));
        }
    }

    if server.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    if server.tls.is_some() && server.port == server.http_port {
        errors.push(ValidationError::PortClash);
    }

    for route in server.static_routes() {
        if !route.route.starts_with('/') {
            errors.push(ValidationError::BadStaticRoute(route.route));
        }
    }

    let limit = &server.rate_limit;
    if limit.enabled && (limit.requests_per_second == 0 || limit.burst == 0) {
        errors.push(ValidationError::BadRateLimit);
    }

    if server.session.enabled && server.session.secret.is_empty() {
        errors.push(ValidationError::MissingSessionSecret);
    }

    if config.app.master_title.trim().is_empty() {
        errors.push(ValidationError::EmptyTitle("master_title"));
    }
    if config.app.worker_title.trim().is_empty() {
        errors.push(ValidationError::EmptyTitle("worker_title"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
