use crate::errors::ValidationError;
use crate::invalidation::InvalidationTypes;
use crate::request::PathTemplate;
use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lower bound for `timeout + connect_timeout`.
pub const MIN_TIMEOUT_BUDGET_SECS: f64 = 0.4;
/// Upper bound for `timeout + connect_timeout`.
pub const MAX_TIMEOUT_BUDGET_SECS: f64 = 10.0;

// Float fields are compared with a small tolerance so that e.g. 0.1 + 0.3 is
// still accepted as 0.4.
const EPSILON: f64 = 1e-9;

/// HTTP methods a purger can issue
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    #[default]
    Ban,
    Get,
    Post,
    Head,
    Put,
    Options,
    Purge,
    Delete,
    Trace,
    Connect,
}

impl RequestMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Ban => "BAN",
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Head => "HEAD",
            RequestMethod::Put => "PUT",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::Purge => "PURGE",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Trace => "TRACE",
            RequestMethod::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RequestMethod> for http::Method {
    fn from(method: RequestMethod) -> Self {
        match method {
            RequestMethod::Get => http::Method::GET,
            RequestMethod::Post => http::Method::POST,
            RequestMethod::Head => http::Method::HEAD,
            RequestMethod::Put => http::Method::PUT,
            RequestMethod::Options => http::Method::OPTIONS,
            RequestMethod::Delete => http::Method::DELETE,
            RequestMethod::Trace => http::Method::TRACE,
            RequestMethod::Connect => http::Method::CONNECT,
            // Extension methods; the literals are valid tokens
            RequestMethod::Ban | RequestMethod::Purge => {
                http::Method::from_bytes(method.as_str().as_bytes())
                    .unwrap_or(http::Method::GET)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// How a batch of invalidations maps onto requests
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One request per invalidation
    #[default]
    Single,
    /// One request for the whole batch, targets joined into `{target}`
    Bundled,
}

/// Address the REST service binds to
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Outbound header. Entries where either side is empty are dropped on load.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Header {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub value: String,
}

impl Header {
    pub fn new(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Settings of one purger instance.
///
/// Defaults match a freshly created purger: a `BAN` request for cache tags
/// against `http://localhost:80/`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PurgerSettings {
    /// Unique id of this purger instance
    pub id: String,
    /// Readable name; the default label is used when empty
    pub name: String,
    /// The invalidation type this purger invalidates
    pub invalidation_type: String,
    pub mode: DispatchMode,
    /// Host or IP address to connect to
    pub hostname: String,
    pub port: u16,
    /// Path template, may contain `{target}` and `{type}`
    pub path: String,
    pub request_method: RequestMethod,
    pub scheme: Scheme,
    /// Whether to verify TLS certificates
    pub verify: bool,
    pub headers: Vec<Header>,
    /// Request timeout in seconds
    pub timeout: f64,
    /// Seconds to wait while trying to connect to the server
    pub connect_timeout: f64,
    /// Seconds to wait after a batch that issued requests, so that other
    /// purgers get fresh content
    pub cooldown_time: f64,
    /// Maximum number of requests over the lifetime of the process
    pub max_requests: u32,
    /// Maximum number of requests in flight within one batch
    pub concurrency: usize,
    /// Joins targets in bundled mode
    pub bundle_separator: String,
}

impl Default for PurgerSettings {
    fn default() -> Self {
        PurgerSettings {
            id: String::new(),
            name: String::new(),
            invalidation_type: "tag".into(),
            mode: DispatchMode::Single,
            hostname: "localhost".into(),
            port: 80,
            path: "/".into(),
            request_method: RequestMethod::Ban,
            scheme: Scheme::Http,
            verify: true,
            headers: Vec::new(),
            timeout: 0.5,
            connect_timeout: 0.2,
            cooldown_time: 0.0,
            max_requests: 100,
            concurrency: 1,
            bundle_separator: ",".into(),
        }
    }
}

impl PurgerSettings {
    /// Drops header rows with an empty field or value.
    pub fn normalize(&mut self) {
        self.headers
            .retain(|header| !header.field.is_empty() && !header.value.is_empty());
    }

    /// Normalizes and validates the settings against the known invalidation types.
    pub fn validate(&mut self, types: &InvalidationTypes) -> Result<(), ValidationError> {
        self.normalize();

        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }

        if !types.contains(&self.invalidation_type) {
            return Err(ValidationError::UnknownInvalidationType(
                self.invalidation_type.clone(),
            ));
        }

        self.validate_endpoint()?;

        PathTemplate::parse(&self.path)?;

        for header in &self.headers {
            validate_header(header)?;
        }

        let budget = self.time_hint();
        if !(MIN_TIMEOUT_BUDGET_SECS - EPSILON..=MAX_TIMEOUT_BUDGET_SECS + EPSILON)
            .contains(&budget)
        {
            return Err(ValidationError::TimeoutBudget(budget));
        }
        check_range("timeout", self.timeout, 0.1, 8.0)?;
        check_range("connect_timeout", self.connect_timeout, 0.1, 4.0)?;

        check_range("cooldown_time", self.cooldown_time, 0.0, 3.0)?;
        check_range("max_requests", self.max_requests as f64, 1.0, 500.0)?;

        if self.concurrency == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }

        if self.mode == DispatchMode::Bundled && self.bundle_separator.is_empty() {
            return Err(ValidationError::EmptyBundleSeparator);
        }

        Ok(())
    }

    fn validate_endpoint(&self) -> Result<(), ValidationError> {
        if self.hostname.trim().is_empty() {
            return Err(ValidationError::EmptyHostname);
        }
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }

        let base = self.base_url();
        let parsed = url::Url::parse(&base)
            .map_err(|e| ValidationError::InvalidHostname(format!("{}: {e}", self.hostname)))?;
        // Anything that leaks into the path, query or userinfo was not a bare host
        if parsed.path() != "/"
            || parsed.query().is_some()
            || parsed.fragment().is_some()
            || !parsed.username().is_empty()
        {
            return Err(ValidationError::InvalidHostname(self.hostname.clone()));
        }

        Ok(())
    }

    /// `scheme://hostname:port`, without a trailing slash
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.hostname, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_time)
    }

    /// Worst-case time one request can take: connect and request timeouts add up.
    pub fn time_hint(&self) -> f64 {
        self.connect_timeout + self.timeout
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    // NaN fails both comparisons, so test for the valid range
    if value >= min - EPSILON && value <= max + EPSILON {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

fn validate_header(header: &Header) -> Result<(), ValidationError> {
    HeaderName::from_bytes(header.field.as_bytes()).map_err(|e| {
        ValidationError::InvalidHeader {
            field: header.field.clone(),
            reason: e.to_string(),
        }
    })?;
    HeaderValue::from_str(&header.value).map_err(|e| ValidationError::InvalidHeader {
        field: header.field.clone(),
        reason: e.to_string(),
    })?;
    Ok(())
}
