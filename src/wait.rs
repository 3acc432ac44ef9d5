//! Waiting for expectations to be consumed.
//!
//! ```no_run
//! # use mock_http_server::{HttpServer, MatcherOptions};
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = HttpServer::new("localhost", 0);
//! server.start()?;
//! server.expect_oneshot_request("/foo", MatcherOptions::new())?.respond_with_data("OK");
//!
//! let wait = server.wait();
//! // ... exercise the client under test ...
//! let waiting = wait.complete()?;
//! assert!(waiting.result());
//! # Ok(())
//! # }
//! ```

use crate::config::{duration_secs, DEFAULT_WAIT_TIMEOUT};
use crate::dispatch::Engine;
use crate::error::AssertionError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Behaviour of [`HttpServer::wait`](crate::HttpServer::wait).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaitingSettings {
    /// Return an [`AssertionError`] when the wait fails.
    pub raise_assertions: bool,
    /// Give up as soon as a request finds no handler.
    pub stop_on_nohandler: bool,
    /// Upper bound for [`WaitGuard::complete`], in seconds.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for WaitingSettings {
    fn default() -> Self {
        Self {
            raise_assertions: true,
            stop_on_nohandler: true,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Outcome of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiting {
    result: bool,
    elapsed: Duration,
}

impl Waiting {
    /// `true` if every oneshot and ordered handler was consumed in time.
    pub fn result(&self) -> bool {
        self.result
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// An armed wait. Call [`complete`](Self::complete) to block for the
/// result; dropping the guard without completing disarms it.
#[must_use = "a wait does nothing unless completed"]
pub struct WaitGuard {
    engine: Arc<Engine>,
    settings: WaitingSettings,
    started: Instant,
    completed: bool,
}

impl WaitGuard {
    pub(crate) fn new(engine: Arc<Engine>, settings: WaitingSettings) -> Self {
        engine.arm_wait(settings.stop_on_nohandler);
        Self {
            engine,
            settings,
            started: Instant::now(),
            completed: false,
        }
    }

    pub fn settings(&self) -> &WaitingSettings {
        &self.settings
    }

    /// Block until the oneshot and ordered handlers registered when the
    /// wait was armed are consumed, a request
    /// finds no handler (when `stop_on_nohandler`), or the timeout expires.
    pub fn complete(mut self) -> Result<Waiting, AssertionError> {
        self.completed = true;
        let result = self.engine.await_wait(self.settings.timeout);
        let waiting = Waiting {
            result,
            elapsed: self.started.elapsed(),
        };

        if !result && self.settings.raise_assertions {
            if self.settings.stop_on_nohandler {
                self.engine.check_assertions()?;
            }
            return Err(AssertionError::new(format!(
                "Wait timeout occurred, but some handlers left:\n{}",
                self.engine.format_matchers()
            )));
        }

        Ok(waiting)
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.engine.disarm_wait();
        }
    }
}
