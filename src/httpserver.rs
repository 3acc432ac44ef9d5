//! The embeddable mock server.

use crate::bake::BakedHttpServer;
use crate::config::{ServerOptions, DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT};
use crate::dispatch::{Dispatch, Engine};
use crate::error::{display_addr, AssertionError, ServerError};
use crate::handler::RequestHandler;
use crate::matcher::{MatcherOptions, RequestMatcher, UriPattern};
use crate::registry::HandlerType;
use crate::request::Request;
use crate::response::Response;
use crate::server::{launch, DefaultThreadTarget, ListenConfig, Running, ThreadTarget};
use crate::wait::{WaitGuard, WaitingSettings};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{error, info};

/// Mock HTTP server serving declared expectations.
///
/// Expectations are registered with the `expect_*` methods and can be
/// added before or after [`start`](Self::start). Problems seen while
/// serving are queued; call [`check`](Self::check) at the end of a test to
/// surface them.
pub struct HttpServer {
    host: String,
    port: u16,
    tls: Option<Arc<rustls::ServerConfig>>,
    options: ServerOptions,
    engine: Arc<Engine>,
    dispatcher: Arc<dyn Dispatch>,
    thread_target: Arc<dyn ThreadTarget>,
    running: Option<Running>,
}

impl HttpServer {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_options(host, port, None, ServerOptions::default())
    }

    pub fn with_options(
        host: &str,
        port: u16,
        tls: Option<Arc<rustls::ServerConfig>>,
        options: ServerOptions,
    ) -> Self {
        let engine = Arc::new(Engine::new(options.no_handler_status_code));
        let dispatcher: Arc<dyn Dispatch> = engine.clone();
        Self {
            host: host.to_string(),
            port,
            tls,
            options,
            engine,
            dispatcher,
            thread_target: Arc::new(DefaultThreadTarget),
            running: None,
        }
    }

    /// Route requests to `dispatcher` instead of the handler registries.
    pub(crate) fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatch>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    #[cfg(test)]
    pub(crate) fn dispatcher(&self) -> &Arc<dyn Dispatch> {
        &self.dispatcher
    }

    /// Replace the body of the serving thread. Takes effect on next start.
    pub fn set_thread_target(&mut self, target: impl ThreadTarget + 'static) {
        self.thread_target = Arc::new(target);
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Bound port while running, the configured port otherwise.
    pub fn port(&self) -> u16 {
        self.running
            .as_ref()
            .map(|running| running.addr().port())
            .unwrap_or(self.port)
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }
        self.options.validate()?;

        let config = ListenConfig {
            host: self.host.clone(),
            port: self.port,
            tls: self.tls.clone(),
            threaded: self.options.threaded,
            startup_timeout: self.options.startup_timeout,
        };
        let running = launch(
            &config,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.thread_target),
        )?;
        self.running = Some(running);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), ServerError> {
        let running = self.running.take().ok_or(ServerError::NotRunning)?;
        let addr = running.addr();
        running.shutdown();
        info!(%addr, "Mock HTTP server stopped");
        Ok(())
    }

    /// Start unless already running. The returned guard stops the server
    /// on drop only if this call started it.
    pub fn scoped(&mut self) -> Result<ScopedServer<'_>, ServerError> {
        let started = if self.is_running() {
            false
        } else {
            self.start()?;
            true
        };
        Ok(ScopedServer {
            server: self,
            started,
        })
    }

    /// Absolute URL of `suffix` on this server.
    pub fn url_for(&self, suffix: &str) -> String {
        let scheme = if self.is_tls() { "https" } else { "http" };
        let separator = if suffix.starts_with('/') { "" } else { "/" };
        format!(
            "{}://{}{}{}",
            scheme,
            display_addr(&self.host, self.port()),
            separator,
            suffix
        )
    }

    pub fn create_matcher(
        &self,
        uri: impl Into<UriPattern>,
        options: MatcherOptions,
    ) -> Result<RequestMatcher, ServerError> {
        RequestMatcher::new(uri, options)
    }

    /// Register a handler for a prebuilt matcher.
    pub fn expect(&self, matcher: RequestMatcher, handler_type: HandlerType) -> Arc<RequestHandler> {
        let handler = Arc::new(RequestHandler::new(matcher));
        self.engine.add_handler(Arc::clone(&handler), handler_type);
        handler
    }

    /// Register a permanent handler.
    pub fn expect_request(
        &self,
        uri: impl Into<UriPattern>,
        options: MatcherOptions,
    ) -> Result<Arc<RequestHandler>, ServerError> {
        self.expect_typed(uri, options, HandlerType::Permanent)
    }

    /// Register a handler consumed by its first match.
    pub fn expect_oneshot_request(
        &self,
        uri: impl Into<UriPattern>,
        options: MatcherOptions,
    ) -> Result<Arc<RequestHandler>, ServerError> {
        self.expect_typed(uri, options, HandlerType::Oneshot)
    }

    /// Register a handler that must match in registration order.
    pub fn expect_ordered_request(
        &self,
        uri: impl Into<UriPattern>,
        options: MatcherOptions,
    ) -> Result<Arc<RequestHandler>, ServerError> {
        self.expect_typed(uri, options, HandlerType::Ordered)
    }

    fn expect_typed(
        &self,
        uri: impl Into<UriPattern>,
        options: MatcherOptions,
        handler_type: HandlerType,
    ) -> Result<Arc<RequestHandler>, ServerError> {
        let matcher = self.create_matcher(uri, options)?;
        Ok(self.expect(matcher, handler_type))
    }

    /// View of this server that fills in `defaults` on every expectation.
    pub fn bake(&mut self, defaults: MatcherOptions) -> BakedHttpServer<'_> {
        BakedHttpServer::new(self, defaults)
    }

    /// Reset handlers, log, assertions, handler errors and the
    /// permanent-failure state.
    pub fn clear(&self) {
        let mut state = self.engine.lock();
        state.registry.clear();
        state.log.clear();
        state.assertions.clear();
        state.handler_errors.clear();
        state.permanently_failed = false;
    }

    pub fn clear_assertions(&self) {
        self.engine.lock().assertions.clear();
    }

    pub fn clear_handler_errors(&self) {
        self.engine.lock().handler_errors.clear();
    }

    pub fn clear_log(&self) {
        self.engine.lock().log.clear();
    }

    pub fn clear_all_handlers(&self) {
        self.engine.lock().registry.clear();
    }

    /// Pop the oldest queued assertion and return it as an error.
    pub fn check_assertions(&self) -> Result<(), AssertionError> {
        self.engine.check_assertions()
    }

    /// Pop the oldest handler error and return it, with its original type.
    pub fn check_handler_errors(&self) -> anyhow::Result<()> {
        self.engine.check_handler_errors()
    }

    /// [`check_assertions`](Self::check_assertions) then
    /// [`check_handler_errors`](Self::check_handler_errors).
    pub fn check(&self) -> anyhow::Result<()> {
        self.check_assertions()?;
        self.check_handler_errors()
    }

    pub fn assertions(&self) -> Vec<AssertionError> {
        self.engine.lock().assertions.iter().cloned().collect()
    }

    pub fn handler_error_count(&self) -> usize {
        self.engine.lock().handler_errors.len()
    }

    pub fn add_assertion(&self, assertion: impl Into<String>) {
        self.engine.add_assertion(AssertionError::new(assertion));
    }

    pub fn is_permanently_failed(&self) -> bool {
        self.engine.lock().permanently_failed
    }

    pub fn no_handler_status_code(&self) -> u16 {
        self.engine.lock().no_handler_status_code
    }

    pub fn set_no_handler_status_code(&self, status: u16) -> Result<(), ServerError> {
        crate::config::validate_status(status)?;
        self.engine.lock().no_handler_status_code = status;
        Ok(())
    }

    /// Every request served so far, with the response sent.
    pub fn log(&self) -> Vec<(Request, Response)> {
        self.engine.lock().log.entries().to_vec()
    }

    pub fn ordered_handlers(&self) -> Vec<Arc<RequestHandler>> {
        self.engine.lock().registry.ordered()
    }

    pub fn oneshot_handlers(&self) -> Vec<Arc<RequestHandler>> {
        self.engine.lock().registry.oneshot()
    }

    pub fn handlers(&self) -> Vec<Arc<RequestHandler>> {
        self.engine.lock().registry.permanent()
    }

    pub fn format_matchers(&self) -> String {
        self.engine.format_matchers()
    }

    pub fn iter_matching_requests(&self, matcher: &RequestMatcher) -> Vec<(Request, Response)> {
        self.engine.lock().log.matching(matcher)
    }

    pub fn get_matching_requests_count(&self, matcher: &RequestMatcher) -> usize {
        self.engine.lock().log.count(matcher)
    }

    /// Fail unless exactly `count` logged requests match `matcher`.
    pub fn assert_request_made(
        &self,
        matcher: &RequestMatcher,
        count: usize,
    ) -> Result<(), AssertionError> {
        self.engine.lock().log.assert_request_made(matcher, count)
    }

    /// Arm a wait with the default waiting settings.
    pub fn wait(&self) -> WaitGuard {
        self.wait_with(self.options.default_waiting_settings)
    }

    pub fn wait_with(&self, settings: WaitingSettings) -> WaitGuard {
        WaitGuard::new(Arc::clone(&self.engine), settings)
    }
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT)
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("host", &self.host)
            .field("port", &self.port())
            .field("tls", &self.is_tls())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                error!(error = %e, "Failed to stop server on drop");
            }
        }
    }
}

/// Guard returned by [`HttpServer::scoped`].
pub struct ScopedServer<'a> {
    server: &'a mut HttpServer,
    started: bool,
}

impl ScopedServer<'_> {
    /// Whether this guard started the server.
    pub fn started(&self) -> bool {
        self.started
    }
}

impl Deref for ScopedServer<'_> {
    type Target = HttpServer;

    fn deref(&self) -> &HttpServer {
        &*self.server
    }
}

impl DerefMut for ScopedServer<'_> {
    fn deref_mut(&mut self) -> &mut HttpServer {
        &mut *self.server
    }
}

impl Drop for ScopedServer<'_> {
    fn drop(&mut self) {
        if self.started && self.server.is_running() {
            if let Err(e) = self.server.stop() {
                error!(error = %e, "Failed to stop scoped server");
            }
        }
    }
}
