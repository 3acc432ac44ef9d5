//! Owned snapshot of an incoming HTTP request.
//!
//! The transport layer converts every hyper request into a [`Request`]
//! before dispatch, so matchers, handlers and the request log all work on
//! plain data that can be cloned across threads.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use std::fmt;
use std::net::SocketAddr;

/// An incoming request as seen by matchers and handlers.
#[derive(Clone)]
pub struct Request {
    method: String,
    path: String,
    query_string: Bytes,
    headers: HeaderMap,
    body: Bytes,
    scheme: &'static str,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Create a request from a method and a path with optional query string.
    ///
    /// The method is upper-cased and the path is percent-decoded.
    pub fn new(method: &str, path_and_query: &str) -> Self {
        let (raw_path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, query),
            None => (path_and_query, ""),
        };

        Self {
            method: method.to_uppercase(),
            path: decode_path(raw_path),
            query_string: Bytes::copy_from_slice(query.as_bytes()),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            scheme: "http",
            remote_addr: None,
        }
    }

    pub(crate) fn from_parts(
        parts: &http::request::Parts,
        body: Bytes,
        scheme: &'static str,
        remote_addr: SocketAddr,
    ) -> Self {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let mut request = Self::new(parts.method.as_str(), path_and_query);
        request.headers = parts.headers.clone();
        request.body = body;
        request.scheme = scheme;
        request.remote_addr = Some(remote_addr);
        request
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Upper-cased request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Decoded request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw (still encoded) query string, without the leading `?`.
    pub fn query_string(&self) -> &[u8] {
        &self.query_string
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the body as JSON.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Full URL of the request, built from the `Host` header.
    pub fn url(&self) -> String {
        let host = self.header(HOST.as_str()).unwrap_or("localhost");
        let mut url = format!("{}://{}{}", self.scheme, host, self.path);
        if !self.query_string.is_empty() {
            url.push('?');
            url.push_str(&String::from_utf8_lossy(&self.query_string));
        }
        url
    }

    /// Render the headers as they appear on the wire, one `Name: value` line
    /// each, terminated by an empty line.
    pub fn format_headers(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.headers {
            out.push_str(&title_case(name.as_str()));
            out.push_str(": ");
            out.push_str(&String::from_utf8_lossy(value.as_bytes()));
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Request {:?} [{}]>", self.url(), self.method)
    }
}

fn decode_path(raw: &str) -> String {
    let path = if raw.is_empty() { "/" } else { raw };
    match urlencoding::decode(path) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => path.to_string(),
    }
}

/// `content-type` -> `Content-Type`
fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}
