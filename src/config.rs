//! Server options and the YAML expectations file.
//!
//! [`ServerOptions`] carries the tunables shared by every constructor. The
//! expectations file lets the CLI serve a fixed set of handlers without
//! writing Rust.

use crate::error::ServerError;
use crate::hooks::Delay;
use crate::httpserver::HttpServer;
use crate::matcher::{MatcherOptions, UriPattern, URI_DEFAULT};
use crate::query::MappingQueryMatcher;
use crate::registry::HandlerType;
use crate::response::ResponseOptions;
use crate::wait::WaitingSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LISTEN_HOST: &str = "localhost";
pub const DEFAULT_LISTEN_PORT: u16 = 0;
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_THREADED: bool = false;
pub const DEFAULT_NO_HANDLER_STATUS_CODE: u16 = 500;
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of an [`HttpServer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerOptions {
    /// How long `start()` waits for the serving thread, in seconds.
    /// Zero checks readiness once without waiting.
    #[serde(with = "duration_secs")]
    pub startup_timeout: Duration,

    /// Serve requests on a worker pool instead of one thread.
    pub threaded: bool,

    pub default_waiting_settings: WaitingSettings,

    /// Status sent when no handler matches.
    pub no_handler_status_code: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            threaded: DEFAULT_THREADED,
            default_waiting_settings: WaitingSettings::default(),
            no_handler_status_code: DEFAULT_NO_HANDLER_STATUS_CODE,
        }
    }
}

impl ServerOptions {
    pub fn validate(&self) -> Result<(), ServerError> {
        validate_status(self.no_handler_status_code)
    }
}

pub(crate) fn validate_status(status: u16) -> Result<(), ServerError> {
    if !(100..=599).contains(&status) {
        return Err(ServerError::InvalidOption(format!(
            "Invalid status code: {}",
            status
        )));
    }
    Ok(())
}

/// Serde adapter for a [`Duration`] written as fractional seconds.
pub mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {}: {}", secs, e)))
    }
}

/// Contents of an expectations file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Server options
    #[serde(default)]
    pub server: ServerOptions,

    /// Expectations, registered in file order
    #[serde(default)]
    pub expectations: Vec<ExpectationDefinition>,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.server.validate()?;
        for (i, expectation) in self.expectations.iter().enumerate() {
            expectation
                .validate()
                .map_err(|e| anyhow::anyhow!("Expectation {}: {}", i, e))?;
        }
        Ok(())
    }

    /// Register every expectation on `server`.
    pub fn register(&self, server: &HttpServer) -> anyhow::Result<()> {
        for (i, expectation) in self.expectations.iter().enumerate() {
            expectation
                .register(server)
                .map_err(|e| anyhow::anyhow!("Expectation {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// Registry an expectation goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpectationKind {
    #[default]
    Permanent,
    Oneshot,
    Ordered,
}

impl From<ExpectationKind> for HandlerType {
    fn from(kind: ExpectationKind) -> Self {
        match kind {
            ExpectationKind::Permanent => HandlerType::Permanent,
            ExpectationKind::Oneshot => HandlerType::Oneshot,
            ExpectationKind::Ordered => HandlerType::Ordered,
        }
    }
}

/// A single expectation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectationDefinition {
    /// Optional name, used in log lines
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub kind: ExpectationKind,

    /// Request matcher
    #[serde(default)]
    pub request: RequestDefinition,

    /// Response to return
    #[serde(default)]
    pub response: ResponseDefinition,
}

impl ExpectationDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.request.validate()?;
        self.response.validate()?;
        Ok(())
    }

    pub fn register(&self, server: &HttpServer) -> anyhow::Result<()> {
        let matcher = server.create_matcher(self.request.uri.to_pattern()?, self.request.to_options())?;
        let handler = server.expect(matcher, self.kind.into());
        handler.respond_with_data_opts(self.response.body_bytes()?, self.response.to_options());
        if let Some(delay_ms) = self.response.delay_ms {
            handler.with_post_hook(Delay::from_millis(delay_ms));
        }
        tracing::debug!(
            name = self.name.as_deref().unwrap_or("-"),
            kind = ?self.kind,
            "Registered expectation"
        );
        Ok(())
    }
}

/// Request matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RequestDefinition {
    /// URI matching (any URI when omitted)
    #[serde(default)]
    pub uri: UriDefinition,

    /// HTTP method (any when omitted)
    #[serde(default)]
    pub method: Option<String>,

    /// Query string matching
    #[serde(default)]
    pub query_string: Option<QueryDefinition>,

    /// Expected headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Exact body
    #[serde(default)]
    pub data: Option<String>,

    /// JSON body
    #[serde(default)]
    pub json: Option<serde_json::Value>,
}

impl RequestDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.uri.to_pattern()?;
        if self.data.is_some() && self.json.is_some() {
            return Err(ServerError::DataAndJsonExclusive.into());
        }
        Ok(())
    }

    pub fn to_options(&self) -> MatcherOptions {
        let mut options = MatcherOptions::new();
        if let Some(method) = &self.method {
            options = options.method(method);
        }
        if let Some(query) = &self.query_string {
            options = match query {
                QueryDefinition::Flag(flag) => options.query_string(*flag),
                QueryDefinition::Raw(raw) => options.query_string(raw.clone()),
                QueryDefinition::Mapping(mapping) => {
                    options.query_string(MappingQueryMatcher::new(mapping.iter().flat_map(
                        |(key, values)| {
                            values
                                .as_slice()
                                .iter()
                                .map(move |value| (key.clone(), value.clone()))
                        },
                    )))
                }
            };
        }
        if !self.headers.is_empty() {
            options = options.headers(self.headers.clone());
        }
        if let Some(data) = &self.data {
            options = options.data(data.clone());
        }
        if let Some(json) = &self.json {
            options = options.json(json.clone());
        }
        options
    }
}

/// URI matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UriDefinition {
    /// Any URI
    #[default]
    Any,
    /// Exact path match
    Exact { value: String },
    /// Path prefix match
    Prefix { value: String },
    /// Regex pattern match
    Regex { pattern: String },
}

impl UriDefinition {
    pub fn to_pattern(&self) -> Result<UriPattern, ServerError> {
        Ok(match self {
            UriDefinition::Any => UriPattern::from(URI_DEFAULT),
            UriDefinition::Exact { value } => UriPattern::Exact(value.clone()),
            UriDefinition::Prefix { value } => UriPattern::prefix(value),
            UriDefinition::Regex { pattern } => UriPattern::regex(pattern)?,
        })
    }
}

/// Query string matching: `true`/`false`, a raw string, or a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryDefinition {
    Flag(bool),
    Raw(String),
    Mapping(BTreeMap<String, OneOrMany>),
}

/// A single value or a list of values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn as_slice(&self) -> &[String] {
        match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values,
        }
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Delay before responding
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            body: None,
            delay_ms: None,
        }
    }
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_status(self.status)?;
        self.body_bytes()?;
        Ok(())
    }

    pub fn body_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match &self.body {
            Some(body) => body.to_bytes(),
            None => Ok(Vec::new()),
        }
    }

    pub fn to_options(&self) -> ResponseOptions {
        let mut options = ResponseOptions::new().status(self.status);
        if let Some(body) = &self.body {
            options = options.content_type(body.content_type());
        }
        for (name, value) in &self.headers {
            options = options.header(name, value);
        }
        options
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(serde_json::to_string_pretty(content)?.into_bytes()),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))
            }
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => crate::response::DEFAULT_CONTENT_TYPE,
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } => "application/octet-stream",
        }
    }
}
