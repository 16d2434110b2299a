//! What a single API call asks for, before it is bound to a client.

use crate::{Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::collections::BTreeMap;

/// Name of the header carrying an opaque list filter.
pub const FILTER_HEADER: &str = "X-Filter";

/// Query parameter selecting the page of a collection.
pub const PAGE_PARAM: &str = "page";

/// Query parameter selecting the number of items per page.
pub const PAGE_SIZE_PARAM: &str = "page_size";

/// Method, endpoint, per-call headers, and query parameters of one call.
///
/// Query parameters are ordered so one logical request always maps to one
/// URL.
///
/// ```
/// use cirrus::metadata::RequestMetadata;
/// use http::Method;
///
/// let metadata = RequestMetadata::new(Method::GET, "linode/instances")
///     .paged(2, Some(50))
///     .with_filter(r#"{"region":"us-east"}"#)
///     .unwrap();
/// assert_eq!(metadata.query_params.get("page").map(String::as_str), Some("2"));
/// assert_eq!(metadata.filter(), Some(r#"{"region":"us-east"}"#));
/// ```
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub method: Method,
    /// The endpoint, relative to the client's base URL.
    pub path: String,
    /// Headers sent with this call on top of the client defaults.
    pub headers: HeaderMap,
    pub query_params: BTreeMap<String, String>,
}

impl RequestMetadata {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: BTreeMap::new(),
        }
    }

    /// Adds a header, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] for a malformed name or value.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sends `filter` unmodified in the [`FILTER_HEADER`].
    pub fn with_filter(self, filter: impl AsRef<str>) -> Result<Self> {
        self.with_header(FILTER_HEADER, filter)
    }

    /// The filter this call carries, if any.
    pub fn filter(&self) -> Option<&str> {
        self.headers.get(FILTER_HEADER).and_then(|v| v.to_str().ok())
    }

    /// Selects `page` of a collection, optionally with a page size.
    pub fn paged(self, page: u32, page_size: Option<u32>) -> Self {
        let metadata = self.with_query_param(PAGE_PARAM, page.to_string());
        match page_size {
            Some(size) => metadata.with_query_param(PAGE_SIZE_PARAM, size.to_string()),
            None => metadata,
        }
    }

    /// Adds a query parameter, replacing any earlier value.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn with_query_params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query_params.extend(params);
        self
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| Error::ConfigurationError(format!("Invalid header name '{}': {}", name, e)))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| Error::ConfigurationError(format!("Invalid value for header {}: {}", name, e)))?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paged_overrides_earlier_page() {
        let metadata = RequestMetadata::new(Method::GET, "volumes")
            .with_query_param(PAGE_PARAM, "9")
            .paged(1, None);
        assert_eq!(metadata.query_params.get(PAGE_PARAM).unwrap(), "1");
        assert!(!metadata.query_params.contains_key(PAGE_SIZE_PARAM));
    }

    #[test]
    fn test_malformed_filter_is_rejected() {
        let err = RequestMetadata::new(Method::GET, "volumes")
            .with_filter("{\"label\":\"a\nb\"}")
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[test]
    fn test_without_filter() {
        assert!(RequestMetadata::new(Method::GET, "volumes").filter().is_none());
    }
}
