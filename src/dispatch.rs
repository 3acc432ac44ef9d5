//! Dispatch engine.
//!
//! All mutable server state lives in one [`EngineState`] behind a single
//! mutex. Handler selection and registry mutation happen under the lock;
//! the selected handler runs outside it, then the lock is taken again to
//! record the outcome.

use crate::error::AssertionError;
use crate::handler::{HandlerOutcome, RequestHandler};
use crate::log::RequestLog;
use crate::matcher::BytesRepr;
use crate::registry::{HandlerRegistry, HandlerType, Selection};
use crate::request::Request;
use crate::response::Response;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Assertion queued for every request received after an ordered mismatch.
pub const PERMANENT_FAILURE_MESSAGE: &str =
    "All requests will be permanently failed due failed ordered handler";

/// Turns an incoming request into the response sent back to the client.
///
/// The transport calls this once per request, possibly from several
/// threads at once in threaded mode.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, request: Request) -> Response;
}

/// State of an armed wait.
#[derive(Debug, Default)]
pub(crate) struct WaitState {
    armed: bool,
    stop_on_nohandler: bool,
    /// Ordered and oneshot handlers registered when the wait was armed.
    pending: Vec<Arc<RequestHandler>>,
    result: Option<bool>,
}

pub(crate) struct EngineState {
    pub registry: HandlerRegistry,
    pub permanently_failed: bool,
    pub log: RequestLog,
    pub assertions: VecDeque<AssertionError>,
    pub handler_errors: VecDeque<anyhow::Error>,
    pub no_handler_status_code: u16,
    wait: WaitState,
}

impl EngineState {
    /// Set the wait result unless one is already set.
    fn set_wait_result(&mut self, result: bool) -> bool {
        if self.wait.armed && self.wait.result.is_none() {
            self.wait.result = Some(result);
            return true;
        }
        false
    }
}

/// Shared dispatch state and the logic selecting handlers.
pub(crate) struct Engine {
    state: Mutex<EngineState>,
    wait_done: Condvar,
}

impl Engine {
    pub fn new(no_handler_status_code: u16) -> Self {
        Self {
            state: Mutex::new(EngineState {
                registry: HandlerRegistry::default(),
                permanently_failed: false,
                log: RequestLog::default(),
                assertions: VecDeque::new(),
                handler_errors: VecDeque::new(),
                no_handler_status_code,
                wait: WaitState::default(),
            }),
            wait_done: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock()
    }

    pub fn add_handler(&self, handler: Arc<RequestHandler>, handler_type: HandlerType) {
        self.state.lock().registry.add(handler, handler_type);
    }

    pub fn add_assertion(&self, assertion: AssertionError) {
        self.state.lock().assertions.push_back(assertion);
    }

    pub fn format_matchers(&self) -> String {
        self.state.lock().registry.format_matchers()
    }

    pub fn check_assertions(&self) -> Result<(), AssertionError> {
        match self.state.lock().assertions.pop_front() {
            Some(assertion) => Err(assertion),
            None => Ok(()),
        }
    }

    pub fn check_handler_errors(&self) -> anyhow::Result<()> {
        match self.state.lock().handler_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Queue the no-handler assertion and build the no-handler response.
    pub fn respond_nohandler(&self, request: &Request) -> Response {
        let mut state = self.state.lock();
        self.respond_nohandler_locked(&mut state, request)
    }

    fn respond_nohandler_locked(&self, state: &mut EngineState, request: &Request) -> Response {
        warn!(method = %request.method(), path = %request.path(), "No handler found for request");

        if state.wait.stop_on_nohandler && state.set_wait_result(false) {
            self.wait_done.notify_all();
        }

        let message = format!(
            "No handler found for request {:?} with data {:?}.\n{}",
            request,
            BytesRepr(request.body()),
            state.registry.format_matchers()
        );
        state.assertions.push_back(AssertionError::new(message));
        Response::no_handler(state.no_handler_status_code)
    }

    fn respond_permanent_failure(&self, state: &mut EngineState, request: &Request) -> Response {
        warn!(
            method = %request.method(),
            path = %request.path(),
            "Rejecting request, ordered handler failed earlier"
        );
        state
            .assertions
            .push_back(AssertionError::new(PERMANENT_FAILURE_MESSAGE));
        Response::no_handler(500)
    }

    /// Log the exchange and update the wait result.
    pub fn record(&self, request: Request, response: Response) {
        let mut state = self.state.lock();
        self.record_locked(&mut state, request, response);
    }

    fn record_locked(&self, state: &mut EngineState, request: Request, response: Response) {
        state.log.push(request, response);
        if state.wait.armed
            && !state.registry.holds_any(&state.wait.pending)
            && state.set_wait_result(true)
        {
            self.wait_done.notify_all();
        }
    }

    /// Arm the wait signal, discarding any earlier result. The wait
    /// completes once the ordered and oneshot handlers registered now are
    /// consumed; handlers added later are not waited for.
    pub fn arm_wait(&self, stop_on_nohandler: bool) {
        let mut state = self.state.lock();
        let pending = state.registry.outstanding();
        state.wait = WaitState {
            armed: true,
            stop_on_nohandler,
            pending,
            result: None,
        };
    }

    pub fn disarm_wait(&self) {
        self.state.lock().wait = WaitState::default();
    }

    /// Block until the armed wait gets a result or `timeout` elapses, then
    /// disarm it. A timeout counts as `false`.
    /// A timeout too large to represent waits without a deadline.
    pub fn await_wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.wait.result.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.wait_done.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.wait_done.wait(&mut state),
            }
        }
        let result = state.wait.result.unwrap_or(false);
        state.wait = WaitState::default();
        result
    }
}

impl Dispatch for Engine {
    fn dispatch(&self, request: Request) -> Response {
        let (handler, handler_type) = {
            let mut state = self.state.lock();

            if state.permanently_failed {
                let response = self.respond_permanent_failure(&mut state, &request);
                self.record_locked(&mut state, request, response.clone());
                return response;
            }

            match state.registry.select(&request) {
                Selection::Found(handler, handler_type) => (handler, handler_type),
                Selection::OrderedMismatch => {
                    state.permanently_failed = true;
                    let response = self.respond_nohandler_locked(&mut state, &request);
                    self.record_locked(&mut state, request, response.clone());
                    return response;
                }
                Selection::NotFound => {
                    let response = self.respond_nohandler_locked(&mut state, &request);
                    self.record_locked(&mut state, request, response.clone());
                    return response;
                }
            }
        };

        debug!(
            method = %request.method(),
            path = %request.path(),
            handler_type = %handler_type,
            "Request matched"
        );

        let response = match handler.respond(&request) {
            HandlerOutcome::Responded(response) => response,
            HandlerOutcome::Failed(err) => {
                warn!(path = %request.path(), error = %err, "Handler returned an error");
                self.state.lock().handler_errors.push_back(err);
                Response::internal_error()
            }
            HandlerOutcome::Panicked(message) => {
                warn!(path = %request.path(), message = %message, "Handler panicked");
                self.add_assertion(AssertionError::new(message));
                Response::internal_error()
            }
        };

        self.record(request, response.clone());
        response
    }
}
