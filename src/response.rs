//! Typed success responses.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A decoded 2xx response together with details of the exchange.
///
/// Derefs to the decoded body, so `response.field` reads straight through.
///
/// # Examples
///
/// ```no_run
/// use cirrus::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Volume {
///     id: u64,
///     status: String,
/// }
///
/// # async fn example() -> Result<(), cirrus::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com/v4")?
///     .build()?;
///
/// let volume = client.get::<Volume>("volumes/12").await?;
/// println!("volume {} is {} after {} attempt(s)", volume.id, volume.status, volume.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The decoded response body.
    pub data: T,

    /// The HTTP status code of the final attempt.
    pub status: StatusCode,

    /// The response headers of the final attempt.
    pub headers: HeaderMap,

    /// Time from the first attempt being sent until the body was decoded,
    /// retry delays included.
    pub latency: Duration,

    /// How many attempts were sent, `1` when no retry was needed.
    pub attempts: usize,
}

impl<T> Response<T> {
    /// Replaces the body while keeping the exchange details.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Consumes the response, returning only the body.
    pub fn into_data(self) -> T {
        self.data
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
