//! Server that hands each request to the test thread.
//!
//! Instead of declaring expectations up front, the test asks for the next
//! request with [`BlockingHttpServer::assert_request`], checks it, and
//! answers through the returned [`BlockingRequestHandler`]. The serving
//! thread blocks until then.

use crate::config::ServerOptions;
use crate::dispatch::{Dispatch, Engine};
use crate::error::{AssertionError, ServerError};
use crate::httpserver::HttpServer;
use crate::matcher::{MatcherOptions, RequestMatcher, UriPattern};
use crate::request::Request;
use crate::response::{Response, ResponseOptions};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long the serving thread waits for the test thread, per step.
pub const DEFAULT_BLOCKING_TIMEOUT: Duration = Duration::from_secs(30);

enum Reply {
    Claimed,
    Respond(Response),
}

struct PendingRequest {
    request: Request,
    reply: Sender<Reply>,
}

struct BlockingDispatcher {
    engine: Arc<Engine>,
    requests: Sender<PendingRequest>,
    timeout: Duration,
}

impl BlockingDispatcher {
    fn exchange(&self, request: &Request) -> Response {
        let (reply_tx, reply_rx) = channel::bounded(2);
        let pending = PendingRequest {
            request: request.clone(),
            reply: reply_tx,
        };
        if self.requests.send(pending).is_err() {
            return self.engine.respond_nohandler(request);
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(Reply::Respond(response)) => response,
            Ok(Reply::Claimed) => match reply_rx.recv_timeout(self.timeout) {
                Ok(Reply::Respond(response)) => response,
                _ => {
                    self.engine.add_assertion(AssertionError::new(format!(
                        "No response for request: {:?}",
                        request
                    )));
                    Response::no_handler(self.engine.lock().no_handler_status_code)
                }
            },
            Err(_) => {
                debug!(path = %request.path(), "Request was not claimed in time");
                self.engine.respond_nohandler(request)
            }
        }
    }
}

impl Dispatch for BlockingDispatcher {
    fn dispatch(&self, request: Request) -> Response {
        let response = self.exchange(&request);
        self.engine.record(request, response.clone());
        response
    }
}

/// Answer to one request taken by [`BlockingHttpServer::assert_request`].
///
/// Dropping it without responding makes the server queue a
/// "No response for request" assertion.
#[derive(Debug)]
pub struct BlockingRequestHandler {
    request: Request,
    reply: Sender<Reply>,
}

impl BlockingRequestHandler {
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn respond_with_json(self, value: serde_json::Value) {
        let body = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        self.respond_with_data_opts(body, ResponseOptions::new().content_type("application/json"));
    }

    pub fn respond_with_data(self, data: impl Into<Bytes>) {
        self.respond_with_data_opts(data, ResponseOptions::default());
    }

    pub fn respond_with_data_opts(self, data: impl Into<Bytes>, options: ResponseOptions) {
        let response = options.build(data);
        self.respond_with_response(response);
    }

    pub fn respond_with_response(self, response: Response) {
        if self.reply.send(Reply::Respond(response)).is_err() {
            debug!(path = %self.request.path(), "Server stopped waiting for the response");
        }
    }
}

/// Mock server whose requests are answered from the test thread.
pub struct BlockingHttpServer {
    server: HttpServer,
    requests: Receiver<PendingRequest>,
}

impl BlockingHttpServer {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_options(host, port, None, ServerOptions::default(), DEFAULT_BLOCKING_TIMEOUT)
    }

    /// `timeout` bounds how long the serving thread waits for the test to
    /// claim a request, and then for the response.
    pub fn with_options(
        host: &str,
        port: u16,
        tls: Option<Arc<rustls::ServerConfig>>,
        options: ServerOptions,
        timeout: Duration,
    ) -> Self {
        let server = HttpServer::with_options(host, port, tls, options);
        let (tx, rx) = channel::unbounded();
        let dispatcher = Arc::new(BlockingDispatcher {
            engine: Arc::clone(server.engine()),
            requests: tx,
            timeout,
        });
        Self {
            server: server.with_dispatcher(dispatcher),
            requests: rx,
        }
    }

    /// Take the next request and check it against a matcher built from
    /// `uri` and `options`.
    pub fn assert_request(
        &self,
        uri: impl Into<UriPattern>,
        options: MatcherOptions,
        timeout: Duration,
    ) -> anyhow::Result<BlockingRequestHandler> {
        let matcher = RequestMatcher::new(uri, options)?;
        Ok(self.assert_request_matching(&matcher, timeout)?)
    }

    /// Take the next request and check it against `matcher`.
    ///
    /// On a mismatch the client gets the no-handler response.
    pub fn assert_request_matching(
        &self,
        matcher: &RequestMatcher,
        timeout: Duration,
    ) -> Result<BlockingRequestHandler, AssertionError> {
        // No deadline when `timeout` is too large to add to now.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let received = match deadline {
                Some(deadline) => self.requests.recv_deadline(deadline).ok(),
                None => self.requests.recv().ok(),
            };
            let pending = received.ok_or_else(|| {
                AssertionError::new(format!("Waiting for request {} timed out", matcher))
            })?;

            // The serving thread may have given up on this request already.
            if pending.reply.send(Reply::Claimed).is_err() {
                debug!(path = %pending.request.path(), "Skipping abandoned request");
                continue;
            }

            let handler = BlockingRequestHandler {
                request: pending.request,
                reply: pending.reply,
            };

            let diff = matcher.difference(&handler.request);
            if diff.is_empty() {
                return Ok(handler);
            }

            let message = format!(
                "Request {:?} does not match {}: {}",
                handler.request,
                matcher,
                diff.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let response = self.server.engine().respond_nohandler(&handler.request);
            handler.respond_with_response(response);
            return Err(AssertionError::new(message));
        }
    }

    pub fn start(&mut self) -> Result<(), ServerError> {
        self.server.start()
    }

    pub fn stop(&mut self) -> Result<(), ServerError> {
        self.server.stop()
    }

    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }

    pub fn host(&self) -> &str {
        self.server.host()
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn url_for(&self, suffix: &str) -> String {
        self.server.url_for(suffix)
    }

    pub fn clear(&self) {
        self.server.clear();
        while self.requests.try_recv().is_ok() {}
    }

    pub fn check_assertions(&self) -> Result<(), AssertionError> {
        self.server.check_assertions()
    }

    pub fn check(&self) -> anyhow::Result<()> {
        self.server.check()
    }

    pub fn log(&self) -> Vec<(Request, Response)> {
        self.server.log()
    }
}
