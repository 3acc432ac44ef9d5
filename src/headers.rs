//! Header value matching.
//!
//! Headers are compared one by one through a [`HeaderValueMatcher`]. The
//! default implementation uses exact string equality, except for headers
//! with a registered structural comparator (`Authorization` out of the box).

use base64::Engine;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Compares an actual header value against the expected one.
///
/// `actual` is `None` when the request does not carry the header.
pub trait HeaderValueMatcher: Send + Sync {
    fn matches(&self, header_name: &str, actual: Option<&str>, expected: &str) -> bool;
}

impl<F> HeaderValueMatcher for F
where
    F: Fn(&str, Option<&str>, &str) -> bool + Send + Sync,
{
    fn matches(&self, header_name: &str, actual: Option<&str>, expected: &str) -> bool {
        self(header_name, actual, expected)
    }
}

/// Comparator for a single header: `(actual, expected) -> bool`.
pub type ValueComparator = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Per-header comparator table with exact equality as fallback.
///
/// Header names are looked up case-insensitively.
#[derive(Clone)]
pub struct DefaultHeaderValueMatcher {
    comparators: HashMap<String, ValueComparator>,
}

impl Default for DefaultHeaderValueMatcher {
    fn default() -> Self {
        Self::new(Self::default_comparators())
    }
}

impl DefaultHeaderValueMatcher {
    pub fn new(comparators: HashMap<String, ValueComparator>) -> Self {
        Self {
            comparators: comparators
                .into_iter()
                .map(|(name, cmp)| (name.to_ascii_lowercase(), cmp))
                .collect(),
        }
    }

    /// The built-in comparators, keyed by header name.
    pub fn default_comparators() -> HashMap<String, ValueComparator> {
        let mut comparators: HashMap<String, ValueComparator> = HashMap::new();
        comparators.insert(
            "Authorization".to_string(),
            Arc::new(authorization_header_value_matcher),
        );
        comparators
    }

    /// Register or replace the comparator of a header.
    pub fn with_comparator<F>(mut self, header_name: &str, comparator: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.comparators
            .insert(header_name.to_ascii_lowercase(), Arc::new(comparator));
        self
    }
}

impl fmt::Debug for DefaultHeaderValueMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.comparators.keys().collect();
        names.sort();
        f.debug_struct("DefaultHeaderValueMatcher")
            .field("comparators", &names)
            .finish()
    }
}

impl HeaderValueMatcher for DefaultHeaderValueMatcher {
    fn matches(&self, header_name: &str, actual: Option<&str>, expected: &str) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self.comparators.get(&header_name.to_ascii_lowercase()) {
            Some(comparator) => comparator(actual, expected),
            None => actual == expected,
        }
    }
}

/// Parsed `Authorization` header value.
#[derive(Debug, PartialEq, Eq)]
enum Authorization {
    Basic { username: String, password: String },
    Params { scheme: String, params: BTreeMap<String, String> },
    Token { scheme: String, token: String },
}

impl Authorization {
    fn parse(value: &str) -> Option<Self> {
        let (scheme, rest) = value.trim().split_once(' ').unwrap_or((value.trim(), ""));
        let scheme = scheme.to_ascii_lowercase();
        let rest = rest.trim();

        if scheme == "basic" {
            let decoded = base64::engine::general_purpose::STANDARD.decode(rest).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, password) = decoded.split_once(':')?;
            return Some(Self::Basic {
                username: username.to_string(),
                password: password.to_string(),
            });
        }

        match parse_dict_header(rest) {
            Some(params) if !params.is_empty() => Some(Self::Params { scheme, params }),
            _ => Some(Self::Token {
                scheme,
                token: rest.to_string(),
            }),
        }
    }
}

/// Structural comparison of `Authorization` values.
///
/// Parameter order is ignored for parameterised schemes such as Digest;
/// Basic credentials are compared after decoding. Unparsable values fall
/// back to exact comparison.
pub fn authorization_header_value_matcher(actual: &str, expected: &str) -> bool {
    match (Authorization::parse(actual), Authorization::parse(expected)) {
        (Some(actual), Some(expected)) => actual == expected,
        _ => actual == expected,
    }
}

/// Parse `key=value, key2="quoted, value"` into a map.
///
/// Returns `None` when any item lacks a `=`.
pub fn parse_dict_header(value: &str) -> Option<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for item in split_list(value) {
        let (key, raw) = item.split_once('=')?;
        params.insert(key.trim().to_string(), unquote(raw.trim()));
    }
    Some(params)
}

/// Split on commas that are not inside a quoted string.
fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                let item = current.trim();
                if !item.is_empty() {
                    items.push(item.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let item = current.trim();
    if !item.is_empty() {
        items.push(item.to_string());
    }
    items
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].replace("\\\\", "\\").replace("\\\"", "\"")
    } else {
        value.to_string()
    }
}
