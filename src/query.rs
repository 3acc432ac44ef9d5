//! Query string matching strategies.
//!
//! A [`QueryMatcher`] turns the declared expectation and the raw query
//! string of a request into two comparable [`QueryValues`]; the request
//! matches when they are equal.

use std::collections::BTreeMap;
use std::fmt;

/// Comparable representation produced by a [`QueryMatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValues {
    /// Raw bytes, compared exactly.
    Raw(Vec<u8>),
    /// Decoded key to value-list map. Key order is irrelevant, value order
    /// within a key is not.
    Multi(BTreeMap<String, Vec<String>>),
    /// Plain flag.
    Flag(bool),
}

/// Strategy for comparing the query string of a request.
pub trait QueryMatcher: fmt::Debug + Send + Sync {
    /// Return `(expected, actual)`; the query matches when both are equal.
    fn comparing_values(&self, actual: &[u8]) -> (QueryValues, QueryValues);

    fn matches(&self, actual: &[u8]) -> bool {
        let (expected, actual) = self.comparing_values(actual);
        expected == actual
    }
}

/// Byte-exact, order sensitive query string comparison.
#[derive(Clone, PartialEq, Eq)]
pub struct StringQueryMatcher {
    expected: Vec<u8>,
}

impl StringQueryMatcher {
    pub fn new(expected: impl Into<Vec<u8>>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl fmt::Debug for StringQueryMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.expected))
    }
}

impl QueryMatcher for StringQueryMatcher {
    fn comparing_values(&self, actual: &[u8]) -> (QueryValues, QueryValues) {
        (
            QueryValues::Raw(self.expected.clone()),
            QueryValues::Raw(actual.to_vec()),
        )
    }
}

/// Decoded key/value comparison, insensitive to key order.
///
/// Keys declared with a single value are compared against the first value
/// of the request; keys declared with several values are compared against
/// the full ordered value list. The key sets must be equal.
#[derive(Clone, PartialEq, Eq)]
pub struct MappingQueryMatcher {
    expected: BTreeMap<String, Vec<String>>,
}

impl MappingQueryMatcher {
    /// Build from `(key, value)` pairs; repeated keys become multi-valued.
    pub fn new<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut expected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in pairs {
            expected.entry(key.into()).or_default().push(value.into());
        }
        Self { expected }
    }

    pub fn expected(&self) -> &BTreeMap<String, Vec<String>> {
        &self.expected
    }
}

impl fmt::Debug for MappingQueryMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, values) in &self.expected {
            match values.as_slice() {
                [single] => map.entry(key, single),
                many => map.entry(key, &many),
            };
        }
        map.finish()
    }
}

impl QueryMatcher for MappingQueryMatcher {
    fn comparing_values(&self, actual: &[u8]) -> (QueryValues, QueryValues) {
        let mut parsed = parse_query(actual);
        for (key, values) in parsed.iter_mut() {
            let single = self
                .expected
                .get(key)
                .map(|expected| expected.len() == 1)
                .unwrap_or(false);
            if single {
                values.truncate(1);
            }
        }
        (
            QueryValues::Multi(self.expected.clone()),
            QueryValues::Multi(parsed),
        )
    }
}

/// `true` matches any non-empty query string, `false` only an empty one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BooleanQueryMatcher {
    expected: bool,
}

impl BooleanQueryMatcher {
    pub fn new(expected: bool) -> Self {
        Self { expected }
    }
}

impl QueryMatcher for BooleanQueryMatcher {
    fn comparing_values(&self, actual: &[u8]) -> (QueryValues, QueryValues) {
        (
            QueryValues::Flag(self.expected),
            QueryValues::Flag(!actual.is_empty()),
        )
    }
}

/// Parse a query string into a multi-valued map, keeping blank values.
///
/// `+` decodes to a space and percent escapes are resolved.
pub fn parse_query(query: &[u8]) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}
