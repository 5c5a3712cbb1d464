//! Error types for the Cerberus proxy.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Main error type for Cerberus operations.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Client directory backing-store failure
    #[error("client directory unavailable: {0}")]
    Directory(String),

    /// Malformed or unparseable DN
    #[error("invalid DN: {0}")]
    InvalidDn(String),

    /// Credential record could not be parsed or verified
    #[error("credential error: {0}")]
    Credential(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Listener or socket failure on the front-end
    #[error("listener error: {0}")]
    Listener(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ldap3::LdapError> for ProxyError {
    fn from(err: ldap3::LdapError) -> Self {
        ProxyError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Listener(err.to_string())
    }
}

impl From<config::ConfigError> for ProxyError {
    fn from(err: config::ConfigError) -> Self {
        ProxyError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Directory(err.to_string())
    }
}
