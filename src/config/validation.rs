//! Configuration validation.
//!
//! Serde handles syntax; this module checks values. Every problem is
//! collected so an operator sees the whole list in one pass.

use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

use crate::config::schema::WorkerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("host must be set")]
    MissingHost,

    #[error("port must be non-zero")]
    ZeroPort,

    #[error("invalid bind_ip {0:?}")]
    InvalidBindIp(String),

    #[error("private port {private} collides with pool port {pool}")]
    PortCollision { pool: u16, private: u16 },

    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} must be non-zero")]
    Zero(&'static str),
}

/// Validate a configuration for the given worker identity.
pub fn validate_config(config: &WorkerConfig, worker_id: u32) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.host.trim().is_empty() {
        errors.push(ValidationError::MissingHost);
    }
    if config.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    if config.bind_ip.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidBindIp(config.bind_ip.clone()));
    }

    let private = config.private_port(worker_id);
    if private == config.port {
        errors.push(ValidationError::PortCollision {
            pool: config.port,
            private,
        });
    }

    check_addr(&mut errors, "session_store.address", &config.session_store.address);
    check_addr(&mut errors, "cache.address", &config.cache.address);
    if let Some(metrics) = &config.metrics {
        check_addr(&mut errors, "metrics.address", &metrics.address);
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::Empty("tls.cert_path"));
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::Empty("tls.key_path"));
        }
    }
    if let Some(reporting) = &config.error_reporting {
        if reporting.endpoint.is_empty() {
            errors.push(ValidationError::Empty("error_reporting.endpoint"));
        }
    }

    if config.shutdown.disconnect_grace_ms == 0 {
        errors.push(ValidationError::Zero("shutdown.disconnect_grace_ms"));
    }
    if config.shutdown.teardown_timeout_ms == 0 {
        errors.push(ValidationError::Zero("shutdown.teardown_timeout_ms"));
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
