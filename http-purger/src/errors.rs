use http::StatusCode;
use thiserror::Error;

/// Result type alias for purger operations
pub type Result<T, E = DispatchError> = std::result::Result<T, E>;

/// Settings rejected at load time. No dispatcher is started with invalid settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("purger id cannot be empty")]
    EmptyId,

    #[error("duplicate purger id: {0}")]
    DuplicateId(String),

    #[error("hostname cannot be empty")]
    EmptyHostname,

    #[error("invalid hostname: {0}")]
    InvalidHostname(String),

    #[error("port cannot be 0")]
    InvalidPort,

    #[error("unknown invalidation type: {0}")]
    UnknownInvalidationType(String),

    #[error("invalid path template {template:?}: {reason}")]
    InvalidPathTemplate { template: String, reason: String },

    #[error("invalid header {field:?}: {reason}")]
    InvalidHeader { field: String, reason: String },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error(
        "the sum of both timeouts must lie between 0.4 and 10.0 seconds, got {0:.2}; \
         lower values lead to failures under real usage conditions, higher values hurt performance"
    )]
    TimeoutBudget(f64),

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("bundle separator cannot be empty")]
    EmptyBundleSeparator,

    #[error("invalidation type rule {0:?} must accept at least one status code")]
    EmptyStatusPolicy(String),

    #[error("could not build HTTP client: {0}")]
    HttpClient(String),
}

/// A job that cannot be turned into a request. Never consumes request budget.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("invalidation type {0:?} is not supported by this purger")]
    UnsupportedType(String),

    #[error("no rule registered for invalidation type {0:?}")]
    UnknownType(String),

    #[error("invalidation type {0:?} requires a target")]
    EmptyTarget(String),

    #[error("path template requires token {{{0}}} which the invalidation cannot supply")]
    MissingToken(String),

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Reason a job resolved to `Failed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("budget exhausted")]
    BudgetExhausted,

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("request timeout")]
    RequestTimeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("unacceptable response status: {0}")]
    UnacceptableResponse(StatusCode),
}

impl DispatchError {
    /// Classifies a failed send by the phase it failed in.
    fn from_send_failure(
        is_timeout: bool,
        is_connect: bool,
        message: impl FnOnce() -> String,
    ) -> Self {
        // reqwest reports a connect-phase timeout as both a connect and a timeout error
        match (is_timeout, is_connect) {
            (true, true) => DispatchError::ConnectTimeout,
            (true, false) => DispatchError::RequestTimeout,
            (false, _) => DispatchError::ConnectionFailed(message()),
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        DispatchError::from_send_failure(e.is_timeout(), e.is_connect(), || e.to_string())
    }
}

/// Errors surfaced by the REST service
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Request body too large")]
    PayloadTooLarge,
}
