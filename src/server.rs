//! Serving thread and listener lifecycle.
//!
//! The listener is bound synchronously on the caller's thread so bind
//! errors and the assigned port are known before `start()` returns. The
//! socket is then handed to a dedicated OS thread that owns a tokio
//! runtime and runs the hyper accept loop until told to stop.

use crate::dispatch::Dispatch;
use crate::error::{display_addr, ServerError};
use crate::request::Request;
use crate::response::Response;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::{Condvar, Mutex};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Grace period for in-flight connections on stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State of a [`ReadySignal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Ready,
    Failed(String),
}

/// One-shot handoff from the serving thread telling `start()` that the
/// listener is serving, or that it could not start.
///
/// A fresh signal is created for every start.
#[derive(Clone)]
pub struct ReadySignal {
    inner: Arc<(Mutex<ReadyState>, Condvar)>,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(ReadyState::Pending), Condvar::new())),
        }
    }

    pub fn set(&self) {
        self.update(ReadyState::Ready);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.update(ReadyState::Failed(reason.into()));
    }

    fn update(&self, new_state: ReadyState) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        if *state == ReadyState::Pending {
            *state = new_state;
            cvar.notify_all();
        }
    }

    pub fn state(&self) -> ReadyState {
        self.inner.0.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.state() == ReadyState::Ready
    }

    /// Wait until the state leaves `Pending` or `timeout` elapses.
    /// A timeout too large to represent waits without a deadline.
    pub fn wait(&self, timeout: Duration) -> ReadyState {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);
        let mut state = lock.lock();
        while *state == ReadyState::Pending {
            match deadline {
                Some(deadline) => {
                    if cvar.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => cvar.wait(&mut state),
            }
        }
        state.clone()
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadySignal").field(&self.state()).finish()
    }
}

/// Body of the serving thread, supplied a ready signal and the serve loop.
///
/// The default target sets the signal and runs the loop. Custom targets
/// can delay, skip or fail readiness.
pub trait ThreadTarget: Send + Sync {
    fn run(&self, ready: ReadySignal, serve: Serve);
}

impl<F> ThreadTarget for F
where
    F: Fn(ReadySignal, Serve) + Send + Sync,
{
    fn run(&self, ready: ReadySignal, serve: Serve) {
        self(ready, serve)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultThreadTarget;

impl ThreadTarget for DefaultThreadTarget {
    fn run(&self, ready: ReadySignal, serve: Serve) {
        ready.set();
        serve.run();
    }
}

/// Listener settings for one start.
#[derive(Clone)]
pub(crate) struct ListenConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<Arc<rustls::ServerConfig>>,
    pub threaded: bool,
    pub startup_timeout: Duration,
}

/// The accept loop, ready to run on the serving thread.
pub struct Serve {
    listener: std::net::TcpListener,
    addr: SocketAddr,
    dispatcher: Arc<dyn Dispatch>,
    tls: Option<TlsAcceptor>,
    threaded: bool,
    shutdown: oneshot::Receiver<()>,
}

impl Serve {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run until the server is stopped. Blocks the calling thread.
    pub fn run(self) {
        let runtime = if self.threaded {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
        } else {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
        };

        let runtime = match runtime {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Failed to build runtime");
                return;
            }
        };

        // Handlers still running on the blocking pool share the grace
        // period with the connection drain.
        let stopping = runtime.block_on(self.serve());
        runtime.shutdown_timeout(SHUTDOWN_GRACE.saturating_sub(stopping.elapsed()));
    }

    /// Returns when stopping began.
    async fn serve(self) -> Instant {
        let Serve {
            listener,
            addr,
            dispatcher,
            tls,
            threaded,
            mut shutdown,
        } = self;

        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "Failed to register listener");
                return Instant::now();
            }
        };

        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!(%addr, "Accept loop stopping");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        let shutdown_rx = conn_shutdown_rx.clone();
                        match tls.clone() {
                            Some(acceptor) => {
                                connections.spawn(async move {
                                    match acceptor.accept(stream).await {
                                        Ok(tls_stream) => {
                                            serve_connection(tls_stream, dispatcher, "https", remote_addr, threaded, shutdown_rx).await
                                        }
                                        Err(e) => debug!(%remote_addr, error = %e, "TLS handshake failed"),
                                    }
                                });
                            }
                            None => {
                                connections.spawn(serve_connection(stream, dispatcher, "http", remote_addr, threaded, shutdown_rx));
                            }
                        }
                    }
                    Err(e) => error!(%addr, error = %e, "Accept error"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        let stopping = Instant::now();
        drop(listener);
        let _ = conn_shutdown_tx.send(true);

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(%addr, "Connections still open after grace period, aborting");
            connections.abort_all();
        }
        stopping
    }
}

async fn serve_connection<I>(
    io: I,
    dispatcher: Arc<dyn Dispatch>,
    scheme: &'static str,
    remote_addr: SocketAddr,
    threaded: bool,
    mut shutdown: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { handle_request(req, dispatcher, scheme, remote_addr, threaded).await }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(%remote_addr, error = %e, "Connection error");
            }
        }
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!(%remote_addr, error = %e, "Connection error during shutdown");
            }
        }
    }
}

async fn handle_request(
    req: hyper::Request<Incoming>,
    dispatcher: Arc<dyn Dispatch>,
    scheme: &'static str,
    remote_addr: SocketAddr,
    threaded: bool,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(%remote_addr, path = %parts.uri.path(), error = %e, "Failed to read request body");
            let response = Response::new("Failed to read request body").with_status(400);
            return Ok(response.into_hyper());
        }
    };

    let request = Request::from_parts(&parts, body, scheme, remote_addr);

    let response = if threaded {
        match tokio::task::spawn_blocking(move || dispatcher.dispatch(request)).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Dispatch task failed");
                Response::internal_error()
            }
        }
    } else {
        dispatcher.dispatch(request)
    };

    Ok(response.into_hyper())
}

/// Handle of a started serving thread.
pub(crate) struct Running {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Running {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal the accept loop and join the thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(addr = %self.addr, "Serving thread panicked");
            }
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Bind the listener and start the serving thread.
///
/// Returns once the thread reports readiness, or after the startup timeout
/// with a warning. A failed readiness report stops the thread and is
/// returned as [`ServerError::Startup`].
pub(crate) fn launch(
    config: &ListenConfig,
    dispatcher: Arc<dyn Dispatch>,
    target: Arc<dyn ThreadTarget>,
) -> Result<Running, ServerError> {
    let bind_addr = display_addr(&config.host, config.port);
    let listener = std::net::TcpListener::bind((config.host.as_str(), config.port))
        .map_err(|e| ServerError::bind(&bind_addr, e))?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let ready = ReadySignal::new();
    let serve = Serve {
        listener,
        addr,
        dispatcher,
        tls: config.tls.clone().map(TlsAcceptor::from),
        threaded: config.threaded,
        shutdown: shutdown_rx,
    };

    let thread_ready = ready.clone();
    let thread = std::thread::Builder::new()
        .name(format!("mock-http-server-{}", addr.port()))
        .spawn(move || target.run(thread_ready, serve))?;

    let running = Running {
        addr,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    };

    let no_wait = config.startup_timeout.is_zero();
    let state = if no_wait {
        ready.state()
    } else {
        ready.wait(config.startup_timeout)
    };

    match state {
        ReadyState::Ready => {}
        ReadyState::Pending if no_wait => {
            debug!(%addr, "Startup timeout is zero, not waiting for the ready event");
        }
        ReadyState::Pending => {
            warn!(
                %addr,
                timeout_secs = config.startup_timeout.as_secs_f64(),
                "ready event was not set within the startup timeout, requests may race the server startup"
            );
        }
        ReadyState::Failed(reason) => {
            running.shutdown();
            return Err(ServerError::Startup(reason));
        }
    }

    info!(
        %addr,
        tls = config.tls.is_some(),
        threaded = config.threaded,
        "Mock HTTP server started"
    );
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ready_signal_set() {
        let ready = ReadySignal::new();
        let remote = ready.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.set();
        });
        assert_eq!(ready.wait(Duration::from_secs(5)), ReadyState::Ready);
        assert!(ready.is_set());
    }

    #[test]
    fn test_ready_signal_timeout() {
        let ready = ReadySignal::new();
        assert_eq!(ready.wait(Duration::from_millis(20)), ReadyState::Pending);
        assert_eq!(ready.wait(Duration::ZERO), ReadyState::Pending);
    }

    #[test]
    fn test_ready_signal_unbounded_wait() {
        let ready = ReadySignal::new();
        let remote = ready.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.fail("no certificate");
        });
        assert_eq!(
            ready.wait(Duration::MAX),
            ReadyState::Failed("no certificate".to_string())
        );
    }

    #[test]
    fn test_ready_signal_first_state_wins() {
        let ready = ReadySignal::new();
        ready.fail("boom");
        ready.set();
        assert_eq!(ready.state(), ReadyState::Failed("boom".to_string()));
    }
}
