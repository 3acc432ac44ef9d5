//! Error types.
//!
//! Configuration and lifecycle problems are returned immediately as
//! [`ServerError`]. Problems detected while serving are queued and replayed
//! later as [`AssertionError`]s or as the handler's own error value.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised synchronously by the server API.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("data and json parameters are mutually exclusive")]
    DataAndJsonExclusive,

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server failed to start: {0}")]
    Startup(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub(crate) fn bind(addr: impl ToString, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}

/// A failed expectation, carrying a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AssertionError {
    message: String,
}

impl AssertionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A request reached a handler that was never given a response.
#[derive(Debug, Clone, Error)]
#[error("No handler found for request: {method} {path}")]
pub struct NoHandlerError {
    pub method: String,
    pub path: String,
}

/// Address helper used by bind errors.
pub(crate) fn display_addr(host: &str, port: u16) -> String {
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{}:{}", host, port),
    }
}
