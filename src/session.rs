//! A server shared by a whole test session.
//!
//! Starting a listener per test is wasteful. A [`ServerSession`] starts one
//! [`HttpServer`] on first use and hands it out cleared to each test.

use crate::config::{ServerOptions, DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT};
use crate::error::ServerError;
use crate::httpserver::HttpServer;
use std::sync::Arc;
use tracing::{debug, error};

pub const HOST_ENV_VAR: &str = "MOCK_HTTP_SERVER_HOST";
pub const PORT_ENV_VAR: &str = "MOCK_HTTP_SERVER_PORT";

/// Listen address resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_LISTEN_HOST.to_string(),
            port: DEFAULT_LISTEN_PORT,
        }
    }
}

impl SessionConfig {
    /// Read `MOCK_HTTP_SERVER_HOST` and `MOCK_HTTP_SERVER_PORT`.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup(HOST_ENV_VAR) {
            config.host = host;
        }
        if let Some(port) = lookup(PORT_ENV_VAR) {
            config.port = port.trim().parse().map_err(|_| {
                ServerError::InvalidOption(format!("{}: invalid port {:?}", PORT_ENV_VAR, port))
            })?;
        }
        Ok(config)
    }
}

/// Owner of the session-wide server.
pub struct ServerSession {
    config: SessionConfig,
    options: ServerOptions,
    tls: Option<Arc<rustls::ServerConfig>>,
    server: Option<HttpServer>,
}

impl ServerSession {
    pub fn new(config: SessionConfig, options: ServerOptions) -> Self {
        Self {
            config,
            options,
            tls: None,
            server: None,
        }
    }

    pub fn from_env() -> Result<Self, ServerError> {
        Ok(Self::new(SessionConfig::from_env()?, ServerOptions::default()))
    }

    pub fn with_tls(mut self, tls: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The running server, cleared. Started on first call.
    pub fn acquire(&mut self) -> Result<&mut HttpServer, ServerError> {
        let server = match self.server.take() {
            Some(server) => server,
            None => {
                let mut server = HttpServer::with_options(
                    &self.config.host,
                    self.config.port,
                    self.tls.clone(),
                    self.options.clone(),
                );
                server.start()?;
                debug!(url = %server.url_for("/"), "Session server started");
                server
            }
        };
        server.clear();
        Ok(self.server.insert(server))
    }

    pub fn is_started(&self) -> bool {
        self.server.as_ref().is_some_and(HttpServer::is_running)
    }

    /// Stop the server if it is running.
    pub fn finish(&mut self) -> Result<(), ServerError> {
        match self.server.take() {
            Some(mut server) if server.is_running() => server.stop(),
            _ => Ok(()),
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!(error = %e, "Failed to stop session server");
        }
    }
}
