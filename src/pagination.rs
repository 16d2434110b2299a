//! Paginated collection endpoints.
//!
//! Collection endpoints answer with a page envelope:
//!
//! ```json
//! { "page": 1, "pages": 3, "results": 250, "data": [ ... ] }
//! ```
//!
//! [`Client::list_all`] walks every page in order and concatenates the
//! `data` arrays; asking for a specific page through [`ListOptions::page`]
//! fetches only that page.

use crate::{cache::cache_key, metadata::RequestMetadata, Client, Error, Result};
use http::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

/// One page of a collection, as returned by the API.
///
/// `pages` and `data` are required; a response without them is reported
/// as [`Error::DeserializationFailed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    /// The page number this envelope holds.
    #[serde(default)]
    pub page: u32,
    /// Total number of pages.
    pub pages: u32,
    /// Total number of items across all pages.
    #[serde(default)]
    pub results: u64,
    /// The items on this page, in server order.
    pub data: Vec<T>,
}

/// Paging, filtering, and extra query parameters for a list call.
///
/// # Examples
///
/// ```
/// use cirrus::ListOptions;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct MetricsQuery {
///     start: u64,
///     #[serde(skip_serializing_if = "Option::is_none")]
///     region: Option<String>,
/// }
///
/// let options = ListOptions::new()
///     .page_size(100)
///     .filter(r#"{"region": "us-east"}"#)
///     .query_struct(&MetricsQuery { start: 1700000000, region: None })
///     .unwrap();
/// assert_eq!(options.query_params().get("start").map(String::as_str), Some("1700000000"));
/// assert!(!options.query_params().contains_key("region"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ListOptions {
    page: Option<u32>,
    page_size: Option<u32>,
    filter: Option<String>,
    query: BTreeMap<String, String>,
}

impl ListOptions {
    /// Options that fetch every page with no filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches only page `page`. Zero means "all pages".
    pub fn page(mut self, page: u32) -> Self {
        self.page = (page > 0).then_some(page);
        self
    }

    /// Requests `page_size` items per page. Zero leaves the server default.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = (page_size > 0).then_some(page_size);
        self
    }

    /// Restricts results with an opaque, server-interpreted filter.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Adds an extra query parameter.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Adds the top-level fields of `query` as query parameters.
    ///
    /// Field names come from the serialized form, so `#[serde(rename)]`
    /// and `#[serde(skip)]` decide what is included. Only fields carrying a
    /// non-zero value are kept: `null`, `0`, `false`, and `""` are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if `query` does not serialize to a JSON object or a
    /// field holds a nested array or object.
    pub fn query_struct<S: Serialize>(mut self, query: &S) -> Result<Self> {
        let value =
            serde_json::to_value(query).map_err(|e| Error::SerializationFailed(e.to_string()))?;
        let serde_json::Value::Object(fields) = value else {
            return Err(Error::SerializationFailed(
                "query parameters must serialize to an object".to_string(),
            ));
        };

        for (key, value) in fields {
            let rendered = match value {
                serde_json::Value::Null | serde_json::Value::Bool(false) => continue,
                serde_json::Value::Bool(true) => "true".to_string(),
                serde_json::Value::Number(n) => {
                    if n.as_f64() == Some(0.0) {
                        continue;
                    }
                    n.to_string()
                }
                serde_json::Value::String(s) if s.is_empty() => continue,
                serde_json::Value::String(s) => s,
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(Error::SerializationFailed(format!(
                        "query parameter '{}' must be a scalar",
                        key
                    )));
                }
            };
            self.query.insert(key, rendered);
        }
        Ok(self)
    }

    /// The explicitly requested page, if any.
    pub fn requested_page(&self) -> Option<u32> {
        self.page
    }

    /// The requested page size, if any.
    pub fn requested_page_size(&self) -> Option<u32> {
        self.page_size
    }

    /// The filter expression, if any.
    pub fn filter_expression(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Extra query parameters.
    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    fn to_metadata(&self, endpoint: &str, page: u32) -> Result<RequestMetadata> {
        let mut metadata = RequestMetadata::new(Method::GET, endpoint)
            .with_query_params(self.query.clone())
            .paged(page, self.page_size);

        if let Some(filter) = &self.filter {
            metadata = metadata.with_filter(filter)?;
        }
        Ok(metadata)
    }
}

impl Client {
    /// Fetches a single page of `endpoint`.
    ///
    /// Uses the page from `options`, or page 1 when none was requested.
    pub async fn list_page<T>(
        &self,
        endpoint: &str,
        options: &ListOptions,
    ) -> Result<PaginatedResponse<T>>
    where
        T: DeserializeOwned,
    {
        let page = options.page.unwrap_or(1);
        let metadata = options.to_metadata(endpoint, page)?;
        let response = self
            .call::<(), PaginatedResponse<T>>(metadata, None)
            .await?;
        Ok(response.data)
    }

    /// Fetches the items of `endpoint` in server order.
    ///
    /// With an explicit page in `options` exactly one request is made and
    /// that page's items are returned. Otherwise page 1 is fetched, its
    /// `pages` count fixes the total, and pages `2..=pages` follow one at a
    /// time. Any failure discards everything fetched so far.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cirrus::{Client, ListOptions};
    /// use serde::Deserialize;
    ///
    /// #[derive(Debug, Deserialize)]
    /// struct Instance {
    ///     id: u64,
    ///     label: String,
    /// }
    ///
    /// # async fn example() -> Result<(), cirrus::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com/v4")?
    ///     .build()?;
    ///
    /// let options = ListOptions::new().filter(r#"{"region": "us-east"}"#);
    /// let instances: Vec<Instance> = client.list_all("linode/instances", Some(&options)).await?;
    /// println!("{} instances", instances.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn list_all<T>(&self, endpoint: &str, options: Option<&ListOptions>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let default_options = ListOptions::default();
        let options = options.unwrap_or(&default_options);

        let first = self.list_page::<T>(endpoint, options).await?;
        if options.page.is_some() {
            return Ok(first.data);
        }

        let total_pages = first.pages;
        let mut items = first.data;

        tracing::debug!(
            endpoint = %endpoint,
            pages = total_pages,
            results = first.results,
            "Aggregating paginated results"
        );

        for page in 2..=total_pages {
            let options = options.clone().page(page);
            let next = self.list_page::<T>(endpoint, &options).await?;
            items.extend(next.data);
        }

        Ok(items)
    }

    /// Like [`Client::list_all`], served from the response cache when possible.
    ///
    /// Entries are keyed by endpoint and options, so different filters and
    /// pages are cached independently. `expiry` overrides the client's
    /// default cache expiry for this entry.
    pub async fn list_all_cached<T>(
        &self,
        endpoint: &str,
        options: Option<&ListOptions>,
        expiry: Option<std::time::Duration>,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        // Always keyed with options so a plain `get_cached` of the same
        // endpoint never shares the entry.
        let defaults = ListOptions::default();
        let key = cache_key(endpoint, Some(options.unwrap_or(&defaults)));
        if let Some(hit) = self.cache().get::<Vec<T>>(&key) {
            tracing::debug!(endpoint = %endpoint, "Serving list from cache");
            return Ok(hit);
        }

        let items = self.list_all::<T>(endpoint, options).await?;
        self.cache().put_with_expiry(key, items.clone(), expiry);
        Ok(items)
    }
}
