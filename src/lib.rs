//! Mock HTTP Server
//!
//! An HTTP server to run inside tests. Declare the requests the code under
//! test is expected to make, point the client at the server, then check
//! that everything went as declared.
//!
//! # Features
//!
//! - **Request Matching**: Match by URI (exact, regex, predicate), method,
//!   query string, headers, raw or JSON body
//! - **Handler Kinds**: Permanent, oneshot and strictly ordered expectations
//! - **Assertions**: Unmatched requests are queued and replayed on `check()`
//! - **Request Log**: Count and assert requests after the fact
//! - **Waiting**: Block until the oneshot and ordered handlers registered
//!   when the wait began are consumed
//! - **Blocking Mode**: Answer requests one by one from the test thread
//!
//! # Example
//!
//! ```no_run
//! use mock_http_server::{HttpServer, MatcherOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut server = HttpServer::new("localhost", 0);
//! server.start()?;
//!
//! server
//!     .expect_oneshot_request("/hello", MatcherOptions::new().method("GET"))?
//!     .respond_with_json(serde_json::json!({"message": "Hello, World!"}));
//!
//! // ... point the client under test at server.url_for("/hello") ...
//!
//! server.check()?;
//! # Ok(())
//! # }
//! ```

pub mod bake;
pub mod blocking;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod headers;
pub mod hooks;
pub mod httpserver;
mod log;
pub mod matcher;
pub mod query;
mod registry;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod wait;

pub use bake::BakedHttpServer;
pub use blocking::{BlockingHttpServer, BlockingRequestHandler};
pub use config::{MockServerConfig, ServerOptions};
pub use dispatch::{Dispatch, PERMANENT_FAILURE_MESSAGE};
pub use error::{AssertionError, NoHandlerError, ServerError};
pub use handler::{HandlerOutput, RequestHandler};
pub use headers::{DefaultHeaderValueMatcher, HeaderValueMatcher};
pub use hooks::{Chain, Delay, Garbage, PostHook};
pub use httpserver::{HttpServer, ScopedServer};
pub use matcher::{MatcherOptions, RequestMatcher, UriMatcher, UriPattern, METHOD_ALL, URI_DEFAULT};
pub use query::{BooleanQueryMatcher, MappingQueryMatcher, QueryMatcher, StringQueryMatcher};
pub use registry::HandlerType;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseOptions, NO_HANDLER_BODY};
pub use server::{DefaultThreadTarget, ReadySignal, ReadyState, Serve, ThreadTarget};
pub use session::{ServerSession, SessionConfig};
pub use wait::{WaitGuard, Waiting, WaitingSettings};
