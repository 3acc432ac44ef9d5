//! Request matching logic.
//!
//! A [`RequestMatcher`] is an immutable predicate over a [`Request`]. Every
//! declared dimension (uri, method, query string, headers, body) must agree
//! for the request to match; [`RequestMatcher::difference`] lists the ones
//! that do not.

use crate::error::ServerError;
use crate::headers::{DefaultHeaderValueMatcher, HeaderValueMatcher};
use crate::query::{BooleanQueryMatcher, MappingQueryMatcher, QueryMatcher, StringQueryMatcher};
use crate::request::Request;
use bytes::Bytes;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// URI value that matches every path.
pub const URI_DEFAULT: &str = "";

/// Method value that matches every method.
pub const METHOD_ALL: &str = "__ALL";

/// User-supplied path predicate.
pub trait UriMatcher: fmt::Debug + Send + Sync {
    fn matches(&self, path: &str) -> bool;
}

struct FnUriMatcher<F> {
    name: String,
    func: F,
}

impl<F> fmt::Debug for FnUriMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.name)
    }
}

impl<F> UriMatcher for FnUriMatcher<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, path: &str) -> bool {
        (self.func)(path)
    }
}

/// How the request path is matched.
#[derive(Clone)]
pub enum UriPattern {
    /// Matches every path.
    Any,
    /// Exact string equality.
    Exact(String),
    /// Regex search against the path.
    Regex(Regex),
    /// Arbitrary predicate.
    Predicate(Arc<dyn UriMatcher>),
}

impl UriPattern {
    /// Compile a regex pattern.
    pub fn regex(pattern: &str) -> Result<Self, ServerError> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    /// Wrap a closure; `name` is used in diagnostics.
    pub fn predicate<F>(name: &str, func: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(FnUriMatcher {
            name: name.to_string(),
            func,
        }))
    }

    /// Prefix match, built on the predicate variant.
    pub fn prefix(prefix: &str) -> Self {
        let owned = prefix.to_string();
        Self::predicate(&format!("prefix {:?}", prefix), move |path| {
            path.starts_with(&owned)
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            UriPattern::Any => true,
            UriPattern::Exact(value) => path == value,
            UriPattern::Regex(regex) => regex.is_match(path),
            UriPattern::Predicate(matcher) => matcher.matches(path),
        }
    }
}

impl fmt::Debug for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UriPattern::Any => write!(f, "{:?}", URI_DEFAULT),
            UriPattern::Exact(value) => write!(f, "{:?}", value),
            UriPattern::Regex(regex) => write!(f, "Regex({:?})", regex.as_str()),
            UriPattern::Predicate(matcher) => write!(f, "{:?}", matcher),
        }
    }
}

impl From<&str> for UriPattern {
    fn from(value: &str) -> Self {
        if value == URI_DEFAULT {
            UriPattern::Any
        } else {
            UriPattern::Exact(value.to_string())
        }
    }
}

impl From<String> for UriPattern {
    fn from(value: String) -> Self {
        UriPattern::from(value.as_str())
    }
}

impl From<Regex> for UriPattern {
    fn from(value: Regex) -> Self {
        UriPattern::Regex(value)
    }
}

impl<T: UriMatcher + 'static> From<Arc<T>> for UriPattern {
    fn from(value: Arc<T>) -> Self {
        UriPattern::Predicate(value)
    }
}

/// Conversion into a shared [`QueryMatcher`].
///
/// Strings and bytes select [`StringQueryMatcher`], maps and pair lists
/// select [`MappingQueryMatcher`], `bool` selects [`BooleanQueryMatcher`].
pub trait IntoQueryMatcher {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher>;
}

impl IntoQueryMatcher for Arc<dyn QueryMatcher> {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        self
    }
}

impl IntoQueryMatcher for StringQueryMatcher {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(self)
    }
}

impl IntoQueryMatcher for MappingQueryMatcher {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(self)
    }
}

impl IntoQueryMatcher for BooleanQueryMatcher {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(self)
    }
}

impl IntoQueryMatcher for &str {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(StringQueryMatcher::new(self.as_bytes()))
    }
}

impl IntoQueryMatcher for String {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(StringQueryMatcher::new(self.into_bytes()))
    }
}

impl IntoQueryMatcher for &[u8] {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(StringQueryMatcher::new(self))
    }
}

impl IntoQueryMatcher for Vec<u8> {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(StringQueryMatcher::new(self))
    }
}

impl IntoQueryMatcher for bool {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(BooleanQueryMatcher::new(self))
    }
}

impl<K: Into<String>, V: Into<String>> IntoQueryMatcher for HashMap<K, V> {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(MappingQueryMatcher::new(self))
    }
}

impl<K: Into<String>, V: Into<String>> IntoQueryMatcher for BTreeMap<K, V> {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(MappingQueryMatcher::new(self))
    }
}

impl<K: Into<String>, V: Into<String>> IntoQueryMatcher for Vec<(K, V)> {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(MappingQueryMatcher::new(self))
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> IntoQueryMatcher for [(K, V); N] {
    fn into_query_matcher(self) -> Arc<dyn QueryMatcher> {
        Arc::new(MappingQueryMatcher::new(self))
    }
}

/// Optional matcher fields, used by `expect_*` calls and by baking.
///
/// Unset fields fall back to the matcher defaults: any method, any query
/// string, no header or body constraints.
#[derive(Clone, Default)]
pub struct MatcherOptions {
    method: Option<String>,
    data: Option<Bytes>,
    json: Option<serde_json::Value>,
    headers: Option<Vec<(String, String)>>,
    query_string: Option<Arc<dyn QueryMatcher>>,
    header_value_matcher: Option<Arc<dyn HeaderValueMatcher>>,
}

impl MatcherOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    /// Expected raw body. String input is taken as UTF-8.
    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Expected JSON body. `Value::Null` expects a literal `null`.
    pub fn json(mut self, json: serde_json::Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Add one expected header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .get_or_insert_with(Vec::new)
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Replace the expected headers.
    pub fn headers<K, V, I>(mut self, headers: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.headers = Some(
            headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn query_string(mut self, query: impl IntoQueryMatcher) -> Self {
        self.query_string = Some(query.into_query_matcher());
        self
    }

    pub fn header_value_matcher(mut self, matcher: impl HeaderValueMatcher + 'static) -> Self {
        self.header_value_matcher = Some(Arc::new(matcher));
        self
    }

    /// Layer `overrides` on top of `self`; fields set in `overrides` win.
    pub fn merge(&self, overrides: &MatcherOptions) -> MatcherOptions {
        MatcherOptions {
            method: overrides.method.clone().or_else(|| self.method.clone()),
            data: overrides.data.clone().or_else(|| self.data.clone()),
            json: overrides.json.clone().or_else(|| self.json.clone()),
            headers: overrides.headers.clone().or_else(|| self.headers.clone()),
            query_string: overrides
                .query_string
                .clone()
                .or_else(|| self.query_string.clone()),
            header_value_matcher: overrides
                .header_value_matcher
                .clone()
                .or_else(|| self.header_value_matcher.clone()),
        }
    }

    /// Names of the fields that are set, in declaration order.
    pub fn set_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.method.is_some() {
            fields.push("method");
        }
        if self.data.is_some() {
            fields.push("data");
        }
        if self.json.is_some() {
            fields.push("json");
        }
        if self.headers.is_some() {
            fields.push("headers");
        }
        if self.query_string.is_some() {
            fields.push("query_string");
        }
        if self.header_value_matcher.is_some() {
            fields.push("header_value_matcher");
        }
        fields
    }
}

impl fmt::Debug for MatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        if let Some(method) = &self.method {
            map.entry(&"method", method);
        }
        if let Some(data) = &self.data {
            map.entry(&"data", &BytesRepr(data));
        }
        if let Some(json) = &self.json {
            map.entry(&"json", &JsonRepr(json));
        }
        if let Some(headers) = &self.headers {
            map.entry(&"headers", &HeadersRepr(headers));
        }
        if let Some(query) = &self.query_string {
            map.entry(&"query_string", query);
        }
        if self.header_value_matcher.is_some() {
            map.entry(&"header_value_matcher", &"<custom>");
        }
        map.finish()
    }
}

/// One mismatching dimension reported by [`RequestMatcher::difference`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    pub field: &'static str,
    pub actual: String,
    pub expected: String,
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: actual {} expected {}",
            self.field, self.actual, self.expected
        )
    }
}

/// Declared expectation for an incoming request.
#[derive(Clone)]
pub struct RequestMatcher {
    uri: UriPattern,
    method: String,
    query_string: Option<Arc<dyn QueryMatcher>>,
    headers: Vec<(String, String)>,
    header_value_matcher: Arc<dyn HeaderValueMatcher>,
    data: Option<Bytes>,
    json: Option<serde_json::Value>,
}

impl RequestMatcher {
    /// Build a matcher. Fails if both `data` and `json` are set.
    pub fn new(uri: impl Into<UriPattern>, options: MatcherOptions) -> Result<Self, ServerError> {
        if options.data.is_some() && options.json.is_some() {
            return Err(ServerError::DataAndJsonExclusive);
        }

        Ok(Self {
            uri: uri.into(),
            method: options
                .method
                .map(|m| normalize_method(&m))
                .unwrap_or_else(|| METHOD_ALL.to_string()),
            query_string: options.query_string,
            headers: options.headers.unwrap_or_default(),
            header_value_matcher: options
                .header_value_matcher
                .unwrap_or_else(|| Arc::new(DefaultHeaderValueMatcher::default())),
            data: options.data,
            json: options.json,
        })
    }

    /// Matcher on the URI alone.
    pub fn uri(uri: impl Into<UriPattern>) -> Self {
        Self {
            uri: uri.into(),
            method: METHOD_ALL.to_string(),
            query_string: None,
            headers: Vec::new(),
            header_value_matcher: Arc::new(DefaultHeaderValueMatcher::default()),
            data: None,
            json: None,
        }
    }

    pub fn uri_pattern(&self) -> &UriPattern {
        &self.uri
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn match_uri(&self, request: &Request) -> bool {
        self.uri.matches(request.path())
    }

    fn match_method(&self, request: &Request) -> bool {
        self.method == METHOD_ALL || self.method == normalize_method(request.method())
    }

    fn match_query_string(&self, request: &Request) -> bool {
        match &self.query_string {
            Some(qm) => qm.matches(request.query_string()),
            None => true,
        }
    }

    fn match_data(&self, request: &Request) -> bool {
        match &self.data {
            Some(data) => request.body() == data,
            None => true,
        }
    }

    fn match_json(&self, request: &Request) -> bool {
        match &self.json {
            Some(expected) => match serde_json::from_slice::<serde_json::Value>(request.body()) {
                Ok(actual) => &actual == expected,
                Err(_) => false,
            },
            None => true,
        }
    }

    /// Every dimension on which `request` disagrees with this matcher, in
    /// the order uri, method, query string, headers, body.
    pub fn difference(&self, request: &Request) -> Vec<Difference> {
        let mut diff = Vec::new();

        if !self.match_uri(request) {
            diff.push(Difference {
                field: "uri",
                actual: format!("{:?}", request.path()),
                expected: format!("{:?}", self.uri),
            });
        }

        if !self.match_method(request) {
            diff.push(Difference {
                field: "method",
                actual: format!("{:?}", request.method()),
                expected: format!("{:?}", self.method),
            });
        }

        if !self.match_query_string(request) {
            diff.push(Difference {
                field: "query_string",
                actual: format!("{:?}", BytesRepr(request.query_string())),
                expected: self
                    .query_string
                    .as_ref()
                    .map(|qm| format!("{:?}", qm))
                    .unwrap_or_default(),
            });
        }

        let mut actual_headers = Vec::new();
        let mut expected_headers = Vec::new();
        for (name, expected) in &self.headers {
            let actual = request.header(name);
            if !self.header_value_matcher.matches(name, actual, expected) {
                actual_headers.push((name.clone(), actual.map(str::to_string)));
                expected_headers.push((name.clone(), expected.clone()));
            }
        }
        if !expected_headers.is_empty() {
            diff.push(Difference {
                field: "headers",
                actual: format!("{:?}", actual_headers.into_iter().collect::<BTreeMap<_, _>>()),
                expected: format!(
                    "{:?}",
                    expected_headers.into_iter().collect::<BTreeMap<_, _>>()
                ),
            });
        }

        if !self.match_data(request) {
            diff.push(Difference {
                field: "data",
                actual: format!("{:?}", BytesRepr(request.body())),
                expected: format!("{:?}", self.data.as_deref().map(BytesRepr)),
            });
        }

        if !self.match_json(request) {
            diff.push(Difference {
                field: "json",
                actual: format!("{:?}", BytesRepr(request.body())),
                expected: format!("{:?}", self.json.as_ref().map(JsonRepr)),
            });
        }

        diff
    }

    pub fn matches(&self, request: &Request) -> bool {
        self.difference(request).is_empty()
    }
}

impl fmt::Display for RequestMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<RequestMatcher uri={:?} method={:?} query_string={:?} headers={:?} data={:?} json={:?}>",
            self.uri,
            self.method,
            self.query_string,
            HeadersRepr(&self.headers),
            self.data.as_deref().map(BytesRepr),
            self.json.as_ref().map(JsonRepr),
        )
    }
}

impl fmt::Debug for RequestMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn normalize_method(method: &str) -> String {
    if method == METHOD_ALL {
        method.to_string()
    } else {
        method.to_uppercase()
    }
}

/// Renders bytes as `b"..."`.
pub(crate) struct BytesRepr<'a>(pub &'a [u8]);

impl fmt::Debug for BytesRepr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"{}\"", self.0.escape_ascii())
    }
}

struct JsonRepr<'a>(&'a serde_json::Value);

impl fmt::Debug for JsonRepr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct HeadersRepr<'a>(&'a [(String, String)]);

impl fmt::Debug for HeadersRepr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}
