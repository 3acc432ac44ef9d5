//! Servers with pre-filled matcher defaults.

use crate::error::{AssertionError, ServerError};
use crate::handler::RequestHandler;
use crate::httpserver::{HttpServer, ScopedServer};
use crate::matcher::{MatcherOptions, UriPattern};
use std::sync::Arc;

/// A view of an [`HttpServer`] whose `expect_*` calls start from a set of
/// default matcher options. Options passed to a call override the baked
/// ones field by field.
pub struct BakedHttpServer<'a> {
    server: &'a mut HttpServer,
    defaults: MatcherOptions,
}

impl<'a> BakedHttpServer<'a> {
    pub(crate) fn new(server: &'a mut HttpServer, defaults: MatcherOptions) -> Self {
        Self { server, defaults }
    }

    pub fn defaults(&self) -> &MatcherOptions {
        &self.defaults
    }

    /// Bake further defaults on top of these.
    pub fn bake(&mut self, defaults: MatcherOptions) -> BakedHttpServer<'_> {
        let merged = self.defaults.merge(&defaults);
        BakedHttpServer::new(&mut *self.server, merged)
    }

    pub fn expect_request(
        &self,
        uri: impl Into<UriPattern>,
        options: MatcherOptions,
    ) -> Result<Arc<RequestHandler>, ServerError> {
        self.server
            .expect_request(uri, self.defaults.merge(&options))
    }

    pub fn expect_oneshot_request(
        &self,
        uri: impl Into<UriPattern>,
        options: MatcherOptions,
    ) -> Result<Arc<RequestHandler>, ServerError> {
        self.server
            .expect_oneshot_request(uri, self.defaults.merge(&options))
    }

    pub fn expect_ordered_request(
        &self,
        uri: impl Into<UriPattern>,
        options: MatcherOptions,
    ) -> Result<Arc<RequestHandler>, ServerError> {
        self.server
            .expect_ordered_request(uri, self.defaults.merge(&options))
    }

    pub fn url_for(&self, suffix: &str) -> String {
        self.server.url_for(suffix)
    }

    pub fn check_assertions(&self) -> Result<(), AssertionError> {
        self.server.check_assertions()
    }

    pub fn check_handler_errors(&self) -> anyhow::Result<()> {
        self.server.check_handler_errors()
    }

    pub fn check(&self) -> anyhow::Result<()> {
        self.server.check()
    }

    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }

    /// See [`HttpServer::scoped`].
    pub fn scoped(&mut self) -> Result<ScopedServer<'_>, ServerError> {
        self.server.scoped()
    }
}
