//! Retry conditions and the retry policy a [`Client`](crate::Client) runs with.
//!
//! A policy holds an ordered list of [`RetryConditional`]s. After a failed
//! attempt the conditions are evaluated in order and the first match makes
//! the request eligible for another attempt. Conditions are scoped to
//! transient infrastructure failures so that non-idempotent requests (creates,
//! boots, ...) are not duplicated on business-logic errors.

use crate::Error;
use http::{header, HeaderMap, StatusCode};
use rand::Rng;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Header the API uses to request a delay before the next attempt.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Header the API adds to 503 responses during planned maintenance.
pub const MAINTENANCE_MODE_HEADER: &str = "X-Maintenance-Mode";

/// Total attempts made by [`RetryPolicy::default`].
pub const DEFAULT_MAX_ATTEMPTS: usize = 1000;

/// Lower bound on the delay between attempts.
pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(100);

/// Upper bound on the delay between attempts.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Decides whether a failed attempt should be retried.
///
/// Any `Fn(&Error) -> bool` closure is a condition too.
///
/// # Examples
///
/// ```
/// use cirrus::{Error, RetryConditional};
///
/// struct RetryOnConflict;
///
/// impl RetryConditional for RetryOnConflict {
///     fn should_retry(&self, error: &Error) -> bool {
///         error.has_status_code(&[409])
///     }
/// }
/// ```
pub trait RetryConditional: Send + Sync {
    /// Returns `true` if the request that produced `error` should be retried.
    fn should_retry(&self, error: &Error) -> bool;
}

impl<F> RetryConditional for F
where
    F: Fn(&Error) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &Error) -> bool {
        self(error)
    }
}

/// Retries a 400 whose reasons report the target resource as busy.
#[derive(Debug, Clone, Copy)]
pub struct ResourceBusyCondition;

impl RetryConditional for ResourceBusyCondition {
    fn should_retry(&self, error: &Error) -> bool {
        match error {
            Error::HttpError {
                status, reasons, ..
            } if *status == StatusCode::BAD_REQUEST => reasons
                .iter()
                .any(|r| r.reason.trim_end_matches('.').to_ascii_lowercase().ends_with(" busy")),
            _ => false,
        }
    }
}

/// Retries HTTP 429.
#[derive(Debug, Clone, Copy)]
pub struct TooManyRequestsCondition;

impl RetryConditional for TooManyRequestsCondition {
    fn should_retry(&self, error: &Error) -> bool {
        matches!(error, Error::HttpError { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS)
    }
}

/// Retries HTTP 503 unless the API flagged it as planned maintenance.
///
/// Maintenance responses surface as [`Error::MaintenanceMode`] and never match.
#[derive(Debug, Clone, Copy)]
pub struct ServiceUnavailableCondition;

impl RetryConditional for ServiceUnavailableCondition {
    fn should_retry(&self, error: &Error) -> bool {
        match error {
            Error::HttpError {
                status, headers, ..
            } => {
                *status == StatusCode::SERVICE_UNAVAILABLE
                    && !headers.contains_key(MAINTENANCE_MODE_HEADER)
            }
            Error::MaintenanceMode { .. } => {
                tracing::info!("API is under maintenance, request will not be retried");
                false
            }
            _ => false,
        }
    }
}

/// Retries HTTP 408 and client-side request timeouts.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeoutCondition;

impl RetryConditional for RequestTimeoutCondition {
    fn should_retry(&self, error: &Error) -> bool {
        match error {
            Error::Timeout => true,
            Error::HttpError { status, .. } => *status == StatusCode::REQUEST_TIMEOUT,
            _ => false,
        }
    }
}

/// Retries network errors caused by an HTTP/2 GOAWAY frame.
#[derive(Debug, Clone, Copy)]
pub struct GoAwayCondition;

impl RetryConditional for GoAwayCondition {
    fn should_retry(&self, error: &Error) -> bool {
        let Error::Network(e) = error else {
            return false;
        };
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
        while let Some(err) = source {
            if err.to_string().contains("GOAWAY") {
                return true;
            }
            source = err.source();
        }
        false
    }
}

/// Retries 502s and the HTML error pages an nginx proxy in front of the API
/// occasionally answers with.
#[derive(Debug, Clone, Copy)]
pub struct BadGatewayCondition;

impl RetryConditional for BadGatewayCondition {
    fn should_retry(&self, error: &Error) -> bool {
        let Error::HttpError {
            status, headers, ..
        } = error
        else {
            return false;
        };
        if *status == StatusCode::BAD_GATEWAY {
            return true;
        }
        *status == StatusCode::BAD_REQUEST
            && header_is(headers, header::SERVER, "nginx")
            && header_is(headers, header::CONTENT_TYPE, "text/html")
    }
}

fn header_is(headers: &HeaderMap, name: header::HeaderName, expected: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected)
}

/// Parses a `Retry-After` header given either in seconds or as an HTTP date.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER_HEADER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
}

/// How a client retries failed requests.
///
/// # Examples
///
/// ```
/// use cirrus::retry::{RetryPolicy, TooManyRequestsCondition};
/// use std::time::Duration;
///
/// // Only retry rate limiting, at most 5 attempts in total.
/// let policy = RetryPolicy::none()
///     .with_condition(TooManyRequestsCondition)
///     .max_attempts(5)
///     .wait_bounds(Duration::from_millis(250), Duration::from_secs(10));
/// assert_eq!(policy.conditions().len(), 1);
/// ```
pub struct RetryPolicy {
    conditions: Vec<Box<dyn RetryConditional>>,
    max_attempts: usize,
    min_wait: Duration,
    max_wait: Duration,
    jitter: bool,
    respect_retry_after: bool,
}

impl RetryPolicy {
    /// A policy with no conditions: every failure is returned immediately.
    pub fn none() -> Self {
        Self {
            conditions: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_wait: DEFAULT_MIN_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
            jitter: true,
            respect_retry_after: true,
        }
    }

    /// Appends a condition. Conditions are evaluated in insertion order.
    pub fn with_condition(mut self, condition: impl RetryConditional + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    /// Sets the total number of attempts, the first one included.
    ///
    /// Values below 1 are treated as 1.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the bounds every computed delay is clamped to.
    pub fn wait_bounds(mut self, min_wait: Duration, max_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self.max_wait = max_wait.max(min_wait);
        self
    }

    /// Enables or disables random jitter on backoff delays.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether a `Retry-After` header overrides the computed backoff.
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    /// The configured conditions, in evaluation order.
    pub fn conditions(&self) -> &[Box<dyn RetryConditional>] {
        &self.conditions
    }

    /// The configured total attempt budget.
    pub fn attempt_limit(&self) -> usize {
        self.max_attempts
    }

    /// Returns `true` on the first condition that matches `error`.
    pub fn should_retry(&self, error: &Error) -> bool {
        self.conditions.iter().any(|c| c.should_retry(error))
    }

    /// Returns the delay before the attempt following `attempt`, or `None`
    /// once the attempt budget is spent.
    ///
    /// A server-supplied `retry_after` wins over the exponential backoff;
    /// either way the result stays within `[min_wait, max_wait]`.
    pub fn delay_for_attempt(&self, attempt: usize, retry_after: Option<Duration>) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let delay = match retry_after.filter(|_| self.respect_retry_after) {
            Some(delay) => delay,
            None => {
                let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1) as u32);
                let base = self.min_wait.saturating_mul(multiplier);
                if self.jitter {
                    base.mul_f64(rand::thread_rng().gen_range(1.0..=2.0))
                } else {
                    base
                }
            }
        };

        Some(delay.clamp(self.min_wait, self.max_wait))
    }
}

impl Default for RetryPolicy {
    /// All built-in conditions, [`DEFAULT_MAX_ATTEMPTS`] attempts, waits
    /// between [`DEFAULT_MIN_WAIT`] and [`DEFAULT_MAX_WAIT`].
    fn default() -> Self {
        Self::none()
            .with_condition(ResourceBusyCondition)
            .with_condition(TooManyRequestsCondition)
            .with_condition(ServiceUnavailableCondition)
            .with_condition(RequestTimeoutCondition)
            .with_condition(GoAwayCondition)
            .with_condition(BadGatewayCondition)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("conditions", &self.conditions.len())
            .field("max_attempts", &self.max_attempts)
            .field("min_wait", &self.min_wait)
            .field("max_wait", &self.max_wait)
            .field("jitter", &self.jitter)
            .field("respect_retry_after", &self.respect_retry_after)
            .finish()
    }
}
