//! Request handlers.
//!
//! A [`RequestHandler`] binds one [`RequestMatcher`] to a response producer.
//! The producer, the post hooks and the call history sit behind a mutex so
//! a handler can be configured from the test thread while the serving
//! thread dispatches to it.

use crate::error::NoHandlerError;
use crate::hooks::PostHook;
use crate::matcher::RequestMatcher;
use crate::request::Request;
use crate::response::{IntoResponse, Response, ResponseOptions};
use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Normalized handler function.
pub type Responder = Arc<dyn Fn(&Request) -> anyhow::Result<Response> + Send + Sync>;

/// Values a handler function may return.
///
/// Anything that converts into a [`Response`] is accepted, as well as a
/// `Result` of such a value. Errors are queued on the server and replayed by
/// `check_handler_errors`.
pub trait HandlerOutput {
    fn into_result(self) -> anyhow::Result<Response>;
}

impl<T: IntoResponse> HandlerOutput for T {
    fn into_result(self) -> anyhow::Result<Response> {
        Ok(self.into_response())
    }
}

impl<T, E> HandlerOutput for Result<T, E>
where
    T: IntoResponse,
    E: Into<anyhow::Error>,
{
    fn into_result(self) -> anyhow::Result<Response> {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

/// Result of running a handler on one request.
pub(crate) enum HandlerOutcome {
    Responded(Response),
    /// The handler returned an error, or has no response configured.
    Failed(anyhow::Error),
    /// The handler panicked; carries the panic message.
    Panicked(String),
}

#[derive(Default)]
struct HandlerState {
    responder: Option<Responder>,
    hooks: Vec<Arc<dyn PostHook>>,
    calls: Vec<Option<Bytes>>,
}

/// An expectation: a matcher and the response to send when it matches.
pub struct RequestHandler {
    matcher: RequestMatcher,
    state: Mutex<HandlerState>,
}

impl RequestHandler {
    pub fn new(matcher: RequestMatcher) -> Self {
        Self {
            matcher,
            state: Mutex::new(HandlerState::default()),
        }
    }

    pub fn matcher(&self) -> &RequestMatcher {
        &self.matcher
    }

    /// Respond with `value` serialized as JSON.
    pub fn respond_with_json(&self, value: serde_json::Value) -> &Self {
        self.respond_with_json_opts(
            value,
            ResponseOptions::new().content_type("application/json"),
        )
    }

    pub fn respond_with_json_opts(&self, value: serde_json::Value, options: ResponseOptions) -> &Self {
        let body = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        self.respond_with_data_opts(body, options)
    }

    /// Respond with a 200 and `data` as body.
    pub fn respond_with_data(&self, data: impl Into<Bytes>) -> &Self {
        self.respond_with_data_opts(data, ResponseOptions::default())
    }

    pub fn respond_with_data_opts(&self, data: impl Into<Bytes>, options: ResponseOptions) -> &Self {
        self.respond_with_response(options.build(data))
    }

    /// Respond with a clone of `response` on every call.
    pub fn respond_with_response(&self, response: Response) -> &Self {
        self.set_responder(Arc::new(move |_: &Request| Ok(response.clone())))
    }

    /// Respond by calling `func` with the request.
    pub fn respond_with_handler<F, O>(&self, func: F) -> &Self
    where
        F: Fn(&Request) -> O + Send + Sync + 'static,
        O: HandlerOutput,
    {
        self.set_responder(Arc::new(move |request: &Request| func(request).into_result()))
    }

    fn set_responder(&self, responder: Responder) -> &Self {
        self.state.lock().responder = Some(responder);
        self
    }

    /// Append a hook run on every response this handler produces.
    pub fn with_post_hook(&self, hook: impl PostHook + 'static) -> &Self {
        self.state.lock().hooks.push(Arc::new(hook));
        self
    }

    pub fn has_responder(&self) -> bool {
        self.state.lock().responder.is_some()
    }

    /// Bodies of the requests this handler served, in arrival order.
    /// Empty bodies are recorded as `None`.
    pub fn calls(&self) -> Vec<Option<Bytes>> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// [`calls`](Self::calls) decoded as JSON.
    pub fn calls_json(&self) -> serde_json::Result<Vec<Option<serde_json::Value>>> {
        self.calls()
            .iter()
            .map(|call| call.as_deref().map(serde_json::from_slice).transpose())
            .collect()
    }

    /// Record the call and run the responder and hooks.
    ///
    /// The handler lock is released before user code runs.
    pub(crate) fn respond(&self, request: &Request) -> HandlerOutcome {
        let (responder, hooks) = {
            let mut state = self.state.lock();
            let body = request.body();
            state
                .calls
                .push((!body.is_empty()).then(|| body.clone()));
            (state.responder.clone(), state.hooks.clone())
        };

        let Some(responder) = responder else {
            return HandlerOutcome::Failed(
                NoHandlerError {
                    method: request.method().to_string(),
                    path: request.path().to_string(),
                }
                .into(),
            );
        };

        let run = AssertUnwindSafe(|| {
            responder(request).map(|response| {
                hooks
                    .iter()
                    .fold(response, |response, hook| hook.apply(request, response))
            })
        });

        match catch_unwind(run) {
            Ok(Ok(response)) => HandlerOutcome::Responded(response),
            Ok(Err(err)) => HandlerOutcome::Failed(err),
            Err(payload) => HandlerOutcome::Panicked(panic_message(payload.as_ref())),
        }
    }
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("matcher", &self.matcher)
            .field("calls", &self.call_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
