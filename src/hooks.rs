//! Response post-processing hooks.
//!
//! Hooks run after the handler produced its response, in registration
//! order. Each receives the request and the previous response and returns
//! the response to send.

use crate::request::Request;
use crate::response::Response;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Transformation applied to a handler's response.
pub trait PostHook: Send + Sync {
    fn apply(&self, request: &Request, response: Response) -> Response;
}

impl<F> PostHook for F
where
    F: Fn(&Request, Response) -> Response + Send + Sync,
{
    fn apply(&self, request: &Request, response: Response) -> Response {
        self(request, response)
    }
}

/// Sleeps for a fixed duration before passing the response through.
#[derive(Debug, Clone, Copy)]
pub struct Delay {
    duration: Duration,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }
}

impl PostHook for Delay {
    fn apply(&self, request: &Request, response: Response) -> Response {
        debug!(path = %request.path(), delay_ms = self.duration.as_millis() as u64, "Applying delay");
        std::thread::sleep(self.duration);
        response
    }
}

/// Surrounds the body with random bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Garbage {
    prefix_size: usize,
    suffix_size: usize,
}

impl Garbage {
    pub fn new(prefix_size: usize, suffix_size: usize) -> Self {
        Self {
            prefix_size,
            suffix_size,
        }
    }
}

impl PostHook for Garbage {
    fn apply(&self, _request: &Request, mut response: Response) -> Response {
        let mut rng = rand::thread_rng();
        let mut prefix = vec![0u8; self.prefix_size];
        let mut suffix = vec![0u8; self.suffix_size];
        rng.fill_bytes(&mut prefix);
        rng.fill_bytes(&mut suffix);
        response.wrap_body(&prefix, &suffix);
        response
    }
}

/// Applies several hooks in order.
#[derive(Clone, Default)]
pub struct Chain {
    hooks: Vec<Arc<dyn PostHook>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, hook: impl PostHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl PostHook for Chain {
    fn apply(&self, request: &Request, response: Response) -> Response {
        self.hooks
            .iter()
            .fold(response, |response, hook| hook.apply(request, response))
    }
}
