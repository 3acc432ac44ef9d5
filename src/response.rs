//! Responses produced by handlers.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;
use tracing::warn;

/// Content type used when none is given.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Body of the response sent when no handler matches.
pub const NO_HANDLER_BODY: &str = "No handler found for this request";

/// An HTTP response returned to the client under test.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(Bytes::new())
    }
}

impl Response {
    /// A 200 response with the default content type.
    pub fn new(body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        Self {
            status: StatusCode::OK,
            headers,
            body: body.into(),
        }
    }

    /// Serialize `value` as pretty-printed JSON with an `application/json`
    /// content type.
    pub fn json(value: &serde_json::Value) -> Self {
        let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self::new(body).with_content_type("application/json")
    }

    /// Response sent when no handler matches the request.
    pub fn no_handler(status: u16) -> Self {
        Self::new(NO_HANDLER_BODY).with_status(status)
    }

    /// Generic response for a failing handler.
    pub fn internal_error() -> Self {
        Self::new("Internal Server Error").with_status(500)
    }

    /// Set the status code. Codes outside 100..=999 become 500.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = StatusCode::from_u16(status).unwrap_or_else(|_| {
            warn!(status, "Invalid status code, using 500");
            StatusCode::INTERNAL_SERVER_ERROR
        });
        self
    }

    /// Append a header. Invalid names or values are dropped with a warning.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.append_header(name, value);
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        match HeaderValue::from_str(content_type) {
            Ok(value) => {
                self.headers.insert(CONTENT_TYPE, value);
            }
            Err(_) => warn!(content_type, "Invalid content type ignored"),
        }
        self
    }

    /// Set the content type from a bare mimetype, adding a UTF-8 charset
    /// for textual types.
    pub fn with_mimetype(self, mimetype: &str) -> Self {
        let textual = mimetype.starts_with("text/")
            || mimetype.ends_with("+xml")
            || matches!(mimetype, "application/xml" | "application/javascript");
        if textual && !mimetype.contains("charset") {
            self.with_content_type(&format!("{}; charset=utf-8", mimetype))
        } else {
            self.with_content_type(mimetype)
        }
    }

    pub fn append_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                if name == CONTENT_TYPE {
                    self.headers.insert(name, value);
                } else {
                    self.headers.append(name, value);
                }
            }
            _ => warn!(header = %name, "Invalid response header ignored"),
        }
    }

    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Surround the current body with `prefix` and `suffix`.
    pub fn wrap_body(&mut self, prefix: &[u8], suffix: &[u8]) {
        let mut buf = BytesMut::with_capacity(prefix.len() + self.body.len() + suffix.len());
        buf.extend_from_slice(prefix);
        buf.extend_from_slice(&self.body);
        buf.extend_from_slice(suffix);
        self.body = buf.freeze();
    }

    pub(crate) fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let mut response = hyper::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Status, headers and content type used by the `respond_with_*` helpers.
///
/// `content_type` wins over `mimetype` when both are set.
#[derive(Debug, Clone)]
pub struct ResponseOptions {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub mimetype: Option<String>,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            content_type: None,
            mimetype: None,
        }
    }
}

impl ResponseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn mimetype(mut self, mimetype: &str) -> Self {
        self.mimetype = Some(mimetype.to_string());
        self
    }

    /// Build a response carrying `body`.
    pub fn build(&self, body: impl Into<Bytes>) -> Response {
        let mut response = Response::new(body).with_status(self.status);
        if let Some(content_type) = &self.content_type {
            response = response.with_content_type(content_type);
        } else if let Some(mimetype) = &self.mimetype {
            response = response.with_mimetype(mimetype);
        }
        for (name, value) in &self.headers {
            response.append_header(name, value);
        }
        response
    }
}

/// Conversion of handler return values into a [`Response`].
///
/// `()` and `None` become an empty 200 response; strings and bytes become a
/// 200 response with the default content type.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for () {
    fn into_response(self) -> Response {
        Response::default()
    }
}

impl IntoResponse for Option<Response> {
    fn into_response(self) -> Response {
        self.unwrap_or_default()
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::new(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        Response::new(self)
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> Response {
        Response::new(self)
    }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> Response {
        Response::new(self)
    }
}
