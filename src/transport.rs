//! The HTTP transport seam.
//!
//! Everything above this module talks to the network through the
//! [`Transport`] trait, so tests (or callers with unusual networking needs)
//! can swap in their own implementation. [`ReqwestTransport`] is the default.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// A fully resolved request handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// The HTTP method.
    pub method: Method,
    /// The absolute request URL, query string included.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// The serialized request body.
    ///
    /// `Bytes` clones share the same buffer, so every attempt sends the body
    /// from its first byte.
    pub body: Option<Bytes>,
    /// Per-request timeout.
    pub timeout: Option<Duration>,
}

/// The raw result of a single HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// The full response body.
    pub body: Bytes,
}

/// Sends one HTTP request and returns the raw response.
///
/// Implementations must not retry or interpret status codes; both are handled
/// by [`Client`](crate::Client).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs a single request.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a freshly built `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self { http_client })
    }

    /// Wraps an existing `reqwest::Client`.
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = self
            .http_client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Network(e)
    }
}
