//! The API client: request execution, error normalisation, and retries.
//!
//! [`Client`] is the entry point for every other module. Pagination, waiting,
//! and listening are implemented as further `impl Client` blocks (or types
//! holding a client) on top of [`Client::call`].

use crate::{
    cache::{cache_key, ResponseCache, DEFAULT_CACHE_EXPIRY},
    error::ApiErrorBody,
    metadata::{parse_header, RequestMetadata},
    retry::{RetryPolicy, MAINTENANCE_MODE_HEADER},
    transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse},
    Error, Response, Result,
};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Interval between polls in the wait and listener loops unless configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

const DEFAULT_USER_AGENT: &str = concat!("cirrus/", env!("CARGO_PKG_VERSION"));

/// A client for the cloud API.
///
/// Cheap to clone; clones share the connection pool, retry policy, and
/// response cache.
///
/// # Examples
///
/// ```no_run
/// use cirrus::{Client, Response};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct CreateVolume {
///     label: String,
///     size: u32,
/// }
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
///     .token("my-token")?
///     .build()?;
///
/// let created: Response<Volume> = client
///     .post("volumes", &CreateVolume { label: "data".into(), size: 20 })
///     .await?;
/// println!("volume {} is {}", created.id, created.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    base_url: Url,
    default_headers: HeaderMap,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    cache: ResponseCache,
    poll_interval: Duration,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Makes a typed request.
    ///
    /// The body is serialized once; every attempt re-sends the same bytes.
    /// Failed exchanges are retried according to the client's
    /// [`RetryPolicy`]. Once the retry budget is spent, the last error is
    /// returned as-is. Decoding failures are never retried.
    ///
    /// A 2xx response with an empty body decodes as JSON `null`, so `()` and
    /// `Option<T>` work for endpoints that return nothing.
    pub async fn call<Req, Res>(
        &self,
        metadata: RequestMetadata,
        body: Option<&Req>,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let body = body
            .map(|b| serde_json::to_vec(b).map(Bytes::from))
            .transpose()
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;
        let url = self.resolve_url(&metadata);

        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match self
                .execute_request(&metadata, &url, body.clone(), attempt)
                .await
            {
                Ok(response) => self.check_response(response),
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(response) => {
                    return self.decode_response(response, start_time.elapsed(), attempt);
                }
                Err(e) => e,
            };

            tracing::warn!(
                error = %error,
                attempt = attempt,
                method = %metadata.method,
                path = %metadata.path,
                "Request failed"
            );

            if !self.inner.retry_policy.should_retry(&error) {
                return Err(error);
            }

            let Some(delay) = self
                .inner
                .retry_policy
                .delay_for_attempt(attempt, error.retry_after())
            else {
                tracing::warn!(
                    attempts = attempt,
                    path = %metadata.path,
                    "Retry attempts exhausted"
                );
                return Err(error);
            };

            tracing::info!(
                delay_ms = delay.as_millis(),
                attempt = attempt,
                "Retrying request after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn resolve_url(&self, metadata: &RequestMetadata) -> Url {
        let mut url = self.inner.base_url.clone();
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            metadata.path.trim_start_matches('/')
        );
        url.set_path(&path);

        if !metadata.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &metadata.query_params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Executes a single request attempt.
    async fn execute_request(
        &self,
        metadata: &RequestMetadata,
        url: &Url,
        body: Option<Bytes>,
        attempt: usize,
    ) -> Result<TransportResponse> {
        tracing::debug!(
            method = %metadata.method,
            url = %url,
            attempt = attempt,
            "Executing HTTP request"
        );

        let mut headers = self.inner.default_headers.clone();
        for (name, value) in &metadata.headers {
            headers.insert(name.clone(), value.clone());
        }
        if body.is_some() {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        self.inner
            .transport
            .send(TransportRequest {
                method: metadata.method.clone(),
                url: url.clone(),
                headers,
                body,
                timeout: self.inner.timeout,
            })
            .await
    }

    /// Turns non-2xx responses into typed errors.
    fn check_response(&self, response: TransportResponse) -> Result<TransportResponse> {
        let status = response.status;
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::SERVICE_UNAVAILABLE {
            if let Some(marker) = response.headers.get(MAINTENANCE_MODE_HEADER) {
                let message = marker.to_str().unwrap_or_default().to_string();
                tracing::warn!(message = %message, "API is in maintenance mode");
                return Err(Error::MaintenanceMode {
                    status,
                    message,
                    headers: response.headers,
                });
            }
        }

        let raw_response = String::from_utf8_lossy(&response.body).into_owned();
        let content_type = response
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let canonical = status.canonical_reason().unwrap_or("Unknown Error");

        let (message, reasons) = if !content_type.starts_with("application/json") {
            let message = if status == StatusCode::BAD_GATEWAY {
                canonical.to_string()
            } else {
                format!(
                    "Unexpected Content-Type: Expected: application/json, Received: {}\nResponse body: {}",
                    content_type, raw_response
                )
            };
            (message, Vec::new())
        } else {
            let body: ApiErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
            let message = body.message().unwrap_or_else(|| canonical.to_string());
            (message, body.errors)
        };

        if status.is_client_error() {
            tracing::error!(status = status.as_u16(), message = %message, "Client error (4xx)");
        } else {
            tracing::warn!(status = status.as_u16(), message = %message, "Server error");
        }

        Err(Error::HttpError {
            status,
            message,
            reasons,
            raw_response,
            headers: response.headers,
        })
    }

    fn decode_response<Res>(
        &self,
        response: TransportResponse,
        latency: Duration,
        attempts: usize,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        tracing::info!(
            status = response.status.as_u16(),
            latency_ms = latency.as_millis(),
            attempts = attempts,
            "Received HTTP response"
        );

        let body: &[u8] = if response.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &response.body
        };

        match serde_json::from_slice::<Res>(body) {
            Ok(data) => Ok(Response {
                data,
                status: response.status,
                headers: response.headers,
                latency,
                attempts,
            }),
            Err(e) => {
                let raw_response = String::from_utf8_lossy(&response.body).into_owned();
                tracing::error!(
                    error = %e,
                    raw_response = %raw_response,
                    "Failed to deserialize response"
                );
                Err(Error::DeserializationFailed {
                    raw_response,
                    serde_error: e.to_string(),
                    status: response.status,
                })
            }
        }
    }

    /// Makes a GET request to the given endpoint.
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::GET, path);
        self.call::<(), Res>(metadata, None).await
    }

    /// Makes a GET request, serving it from the response cache when possible.
    ///
    /// `expiry` overrides the client's default cache expiry for this entry.
    pub async fn get_cached<Res>(&self, path: &str, expiry: Option<Duration>) -> Result<Res>
    where
        Res: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let key = cache_key(path, None);
        if let Some(hit) = self.inner.cache.get::<Res>(&key) {
            tracing::debug!(path = %path, "Serving response from cache");
            return Ok(hit);
        }

        let data = self.get::<Res>(path).await?.data;
        self.inner.cache.put_with_expiry(key, data.clone(), expiry);
        Ok(data)
    }

    /// Makes a POST request to the given endpoint with a JSON body.
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::POST, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a PUT request to the given endpoint with a JSON body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PUT, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a DELETE request to the given endpoint, ignoring any response body.
    pub async fn delete(&self, path: impl Into<String>) -> Result<Response<()>> {
        let metadata = RequestMetadata::new(Method::DELETE, path);
        let response = self.call::<(), serde_json::Value>(metadata, None).await?;
        Ok(response.map(|_| ()))
    }

    /// The response cache shared by all clones of this client.
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Enables or disables response caching.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.inner.cache.set_enabled(enabled);
    }

    /// Drops every cached response.
    pub fn invalidate_cache(&self) {
        self.inner.cache.invalidate_all();
    }

    /// Drops the cached response stored under `key`.
    ///
    /// [`Client::get_cached`] stores under `cache_key(path, None)`;
    /// [`Client::list_all_cached`] always stores under a key that includes
    /// its options, defaults included.
    pub fn invalidate_cache_entry(&self, key: &str) {
        self.inner.cache.invalidate(key);
    }

    /// Interval between polls in wait and listener loops.
    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("retry_policy", &self.inner.retry_policy)
            .field("timeout", &self.inner.timeout)
            .field("poll_interval", &self.inner.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use cirrus::{ClientBuilder, RetryPolicy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), cirrus::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com/v4")?
///     .token("my-token")?
///     .timeout(Duration::from_secs(30))
///     .retry_policy(RetryPolicy::default().max_attempts(10))
///     .cache_expiry(Duration::from_secs(300))
///     .poll_interval(Duration::from_secs(2))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    transport: Option<Arc<dyn Transport>>,
    cache_enabled: bool,
    cache_expiry: Duration,
    poll_interval: Duration,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        default_headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_USER_AGENT),
        );

        Self {
            base_url: None,
            default_headers,
            retry_policy: RetryPolicy::default(),
            timeout: None,
            transport: None,
            cache_enabled: true,
            cache_expiry: DEFAULT_CACHE_EXPIRY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the base URL all endpoints are resolved against.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Authenticates every request with a bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value.
    pub fn token(self, token: impl AsRef<str>) -> Result<Self> {
        let value = format!("Bearer {}", token.as_ref());
        self.default_header(header::AUTHORIZATION.as_str(), value)
    }

    /// Overrides the `User-Agent` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid header value.
    pub fn user_agent(self, user_agent: impl AsRef<str>) -> Result<Self> {
        self.default_header(header::USER_AGENT.as_str(), user_agent)
    }

    /// Sets the retry policy for failed requests.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the default reqwest-backed transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Enables or disables the response cache (enabled by default).
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Sets the default expiry of cached responses.
    pub fn cache_expiry(mut self, expiry: Duration) -> Self {
        self.cache_expiry = expiry;
        self
    }

    /// Sets the interval between polls in wait and listener loops.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided, the base URL cannot
    /// carry a path, the poll interval is zero, or the HTTP client cannot be
    /// built.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::ConfigurationError(format!(
                "Base URL cannot have endpoints appended: {}",
                base_url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::ConfigurationError(
                "Poll interval must be greater than zero".to_string(),
            ));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let cache = ResponseCache::new(self.cache_expiry);
        cache.set_enabled(self.cache_enabled);

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                base_url,
                default_headers: self.default_headers,
                retry_policy: self.retry_policy,
                timeout: self.timeout,
                cache,
                poll_interval: self.poll_interval,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Replays canned responses and records every request it sees.
    struct ScriptedTransport {
        responses: Mutex<Vec<TransportResponse>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        fn new(mut responses: Vec<TransportResponse>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| Error::ConfigurationError("script exhausted".to_string()))
        }
    }

    fn json(status: u16, body: &str) -> TransportResponse {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        TransportResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    fn client(transport: Arc<ScriptedTransport>, policy: RetryPolicy) -> Client {
        Client::builder()
            .base_url("https://api.example.com/v4")
            .unwrap()
            .transport(transport)
            .retry_policy(policy)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_endpoint_is_joined_onto_base_path() {
        let transport = ScriptedTransport::new(vec![json(200, "{}")]);
        let client = client(transport.clone(), RetryPolicy::none());

        let metadata = RequestMetadata::new(Method::GET, "/linode/instances")
            .with_query_param("page", "2");
        client
            .call::<(), serde_json::Value>(metadata, None)
            .await
            .unwrap();

        let requests = transport.requests.lock();
        assert_eq!(
            requests[0].url.as_str(),
            "https://api.example.com/v4/linode/instances?page=2"
        );
    }

    #[tokio::test]
    async fn test_body_is_resent_on_every_attempt() {
        let transport = ScriptedTransport::new(vec![
            json(429, "{}"),
            json(429, "{}"),
            json(200, r#"{"id": 1}"#),
        ]);
        let policy = RetryPolicy::default().wait_bounds(Duration::ZERO, Duration::ZERO);
        let client = client(transport.clone(), policy);

        let response = client
            .post::<_, serde_json::Value>("volumes", &serde_json::json!({"label": "data"}))
            .await
            .unwrap();
        assert_eq!(response.attempts, 3);

        let requests = transport.requests.lock();
        assert_eq!(requests.len(), 3);
        for request in requests.iter() {
            assert_eq!(
                request.body.as_deref(),
                Some(br#"{"label":"data"}"#.as_slice())
            );
        }
    }

    #[tokio::test]
    async fn test_decode_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![json(200, "not json"), json(200, "{}")]);
        let policy = RetryPolicy::none().with_condition(|_: &Error| true);
        let client = client(transport.clone(), policy);

        let result = client.get::<serde_json::Value>("volumes/1").await;
        assert!(matches!(result, Err(Error::DeserializationFailed { .. })));
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_decodes_as_unit() {
        let transport = ScriptedTransport::new(vec![json(200, "")]);
        let client = client(transport, RetryPolicy::none());
        client.delete("volumes/1").await.unwrap();
    }

    #[tokio::test]
    async fn test_error_reasons_are_decoded() {
        let transport = ScriptedTransport::new(vec![json(
            400,
            r#"{"errors":[{"reason":"Label too long","field":"label"}]}"#,
        )]);
        let client = client(transport, RetryPolicy::default());

        let err = client.get::<serde_json::Value>("volumes/1").await.unwrap_err();
        assert_eq!(err.to_string(), "[400] [label] Label too long");
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_build_requires_base_url() {
        let result = Client::builder().build();
        assert!(matches!(result, Err(Error::ConfigurationError(_))));

        let result = Client::builder()
            .base_url("https://api.example.com")
            .unwrap()
            .poll_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }
}
