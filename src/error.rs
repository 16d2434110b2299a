//! Error types for API calls, pagination, and the wait/poll engine.
//!
//! Non-2xx responses are normalised into [`Error::HttpError`] (or
//! [`Error::MaintenanceMode`] when the API signals planned downtime) with the
//! decoded API error reasons attached. Wait and listener outcomes that are
//! expected in normal operation, such as a timeout or a failed event, have
//! their own variants so callers can match on them.

use crate::event::Event;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The main error type for the crate.
///
/// # Examples
///
/// ```no_run
/// use cirrus::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com/v4")?
///     .build()?;
///
/// match client.get::<serde_json::Value>("linode/instances/123").await {
///     Ok(response) => println!("Instance: {:?}", response.data),
///     Err(e) if e.is_not_found() => println!("No such instance"),
///     Err(Error::MaintenanceMode { message, .. }) => {
///         eprintln!("API is down for maintenance: {}", message);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection failed, DNS lookup failed,
    /// HTTP/2 stream reset, etc.).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A single request exceeded the configured request timeout.
    #[error("Request timed out")]
    Timeout,

    /// The response body could not be decoded into the expected type.
    ///
    /// For paginated endpoints this includes a page envelope that is missing
    /// its `pages` or `data` field. Never retried.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The server returned a non-2xx HTTP status code.
    #[error("[{}] {message}", status.as_u16())]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// Human readable message built from the API error reasons
        message: String,
        /// The individual reasons reported by the API
        reasons: Vec<ApiErrorReason>,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// The API answered 503 with a maintenance marker.
    ///
    /// Distinct from a plain 503 so callers can tell planned downtime apart
    /// from transient unavailability. Never retried.
    #[error("[{}] API is in maintenance mode: {message}", status.as_u16())]
    MaintenanceMode {
        /// The HTTP status code
        status: StatusCode,
        /// The value of the maintenance marker header
        message: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Failed to serialize the request body or list options.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A wait loop hit its deadline before the target state was observed.
    #[error("timed out waiting for {resource} {id} {field} to reach '{expected}'")]
    WaitTimeout {
        /// The kind of resource being waited on
        resource: String,
        /// The resource identifier
        id: String,
        /// The field being watched
        field: String,
        /// The awaited value of `field`
        expected: String,
    },

    /// The watched event reached the terminal `failed` status.
    ///
    /// The event itself is carried along since it is as meaningful to the
    /// caller as the failure.
    #[error("{message}")]
    EventFailed {
        /// The failed event
        event: Box<Event>,
        /// Description of the failed action
        message: String,
    },

    /// A listener poll cycle returned a resource nobody registered a future for.
    #[error("unexpected resource {id} found while polling")]
    UnexpectedResource {
        /// The unexpected resource id
        id: u64,
    },

    /// A future was unregistered that was never registered (or already removed).
    #[error("no future registered for resource {id}")]
    FutureNotFound {
        /// The resource id
        id: u64,
    },

    /// A future was registered twice while the listener rejects duplicates.
    #[error("a future is already registered for resource {id}")]
    FutureAlreadyRegistered {
        /// The resource id
        id: u64,
    },

    /// A long-running operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` if the default [`RetryPolicy`](crate::RetryPolicy)
    /// would retry this error.
    ///
    /// Clients built with a custom policy may retry more or less than this.
    ///
    /// # Examples
    ///
    /// ```
    /// use cirrus::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::TOO_MANY_REQUESTS,
    ///     message: "Too Many Requests".to_string(),
    ///     reasons: Vec::new(),
    ///     raw_response: String::new(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(err.is_retryable());
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::BAD_REQUEST,
    ///     message: "[label] too long".to_string(),
    ///     reasons: Vec::new(),
    ///     raw_response: String::new(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        crate::RetryPolicy::default().should_retry(self)
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. }
            | Error::MaintenanceMode { status, .. }
            | Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. }
            | Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns the response headers if this error carries them.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Error::HttpError { headers, .. } | Error::MaintenanceMode { headers, .. } => {
                Some(headers)
            }
            _ => None,
        }
    }

    /// Returns the server-requested delay from a `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        crate::retry::parse_retry_after(self.headers()?)
    }

    /// Returns `true` for a 404 response.
    pub fn is_not_found(&self) -> bool {
        self.has_status_code(&[404])
    }

    /// Returns `true` if the error carries any of the given status codes.
    pub fn has_status_code(&self, codes: &[u16]) -> bool {
        self.status()
            .is_some_and(|status| codes.contains(&status.as_u16()))
    }
}

/// A single reason entry from an API error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorReason {
    /// Why the request failed
    pub reason: String,
    /// The request field the reason applies to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl std::fmt::Display for ApiErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.field.as_deref() {
            Some(field) if !field.is_empty() => write!(f, "[{}] {}", field, self.reason),
            _ => f.write_str(&self.reason),
        }
    }
}

/// The JSON body the API sends alongside non-2xx responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Reported reasons
    #[serde(default)]
    pub errors: Vec<ApiErrorReason>,
}

impl ApiErrorBody {
    /// Joins all reasons into a single message, `None` if there are none.
    pub fn message(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
