//! In-memory response cache.
//!
//! Entries are keyed by endpoint (optionally suffixed with a hash of the list
//! options used), expire lazily on read, and are shared by every clone of a
//! [`Client`](crate::Client). There is no background eviction: an entry lives
//! until it is read after expiry or invalidated.

use crate::pagination::ListOptions;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Expiry applied to entries stored without an override.
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// A cached value and when it was stored.
#[derive(Clone)]
pub struct CacheEntry {
    created_at: Instant,
    data: Arc<dyn Any + Send + Sync>,
    expiry_override: Option<Duration>,
}

impl CacheEntry {
    /// When the entry was stored.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The per-entry expiry, if one was given at insertion.
    pub fn expiry_override(&self) -> Option<Duration> {
        self.expiry_override
    }

    fn is_expired(&self, default_expiry: Duration, now: Instant) -> bool {
        let expiry = self.expiry_override.unwrap_or(default_expiry);
        now.saturating_duration_since(self.created_at) > expiry
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("created_at", &self.created_at)
            .field("expiry_override", &self.expiry_override)
            .finish_non_exhaustive()
    }
}

/// Thread-safe, type-erased response cache.
///
/// # Examples
///
/// ```
/// use cirrus::cache::ResponseCache;
/// use std::time::Duration;
///
/// let cache = ResponseCache::new(Duration::from_secs(60));
/// cache.put("regions", vec!["us-east".to_string()]);
///
/// let regions: Option<Vec<String>> = cache.get("regions");
/// assert_eq!(regions, Some(vec!["us-east".to_string()]));
///
/// cache.invalidate_all();
/// assert!(cache.get::<Vec<String>>("regions").is_none());
/// ```
#[derive(Debug)]
pub struct ResponseCache {
    state: RwLock<CacheState>,
    enabled: AtomicBool,
}

/// Entries and the default expiry, guarded together.
#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    default_expiry: Duration,
}

impl ResponseCache {
    /// Creates an enabled cache with the given default expiry.
    pub fn new(default_expiry: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                default_expiry,
            }),
            enabled: AtomicBool::new(true),
        }
    }

    /// Returns the cached value for `key`.
    ///
    /// Expired entries are removed and reported as a miss. A value stored
    /// under a different type is also a miss.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();

        {
            let state = self.state.read();
            let entry = state.entries.get(key)?;
            if !entry.is_expired(state.default_expiry, now) {
                return entry.data.downcast_ref::<T>().cloned();
            }
        }

        // Re-check under the write lock: another caller may have replaced
        // the entry or changed the expiry between the two acquisitions.
        let mut state = self.state.write();
        let default_expiry = state.default_expiry;
        if state
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(default_expiry, now))
        {
            tracing::debug!(key = %key, "Evicting expired cache entry");
            state.entries.remove(key);
        }
        None
    }

    /// Stores `value` under `key` using the default expiry.
    pub fn put<T>(&self, key: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.put_with_expiry(key, value, None);
    }

    /// Stores `value` under `key`, optionally overriding the default expiry.
    ///
    /// A no-op while the cache is disabled.
    pub fn put_with_expiry<T>(&self, key: impl Into<String>, value: T, expiry: Option<Duration>)
    where
        T: Send + Sync + 'static,
    {
        if !self.is_enabled() {
            return;
        }

        let entry = CacheEntry {
            created_at: Instant::now(),
            data: Arc::new(value),
            expiry_override: expiry,
        };
        self.state.write().entries.insert(key.into(), entry);
    }

    /// Removes a single entry.
    pub fn invalidate(&self, key: &str) {
        self.state.write().entries.remove(key);
    }

    /// Removes every entry.
    pub fn invalidate_all(&self) {
        self.state.write().entries.clear();
    }

    /// Turns caching on or off without touching stored entries.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Returns `true` if the cache serves and stores values.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Changes the expiry for entries without an override.
    pub fn set_default_expiry(&self, expiry: Duration) {
        self.state.write().default_expiry = expiry;
    }

    /// The expiry for entries without an override.
    pub fn default_expiry(&self) -> Duration {
        self.state.read().default_expiry
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Returns `true` if an entry, live or expired, is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.state.read().entries.contains_key(key)
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_EXPIRY)
    }
}

/// Builds the cache key for `endpoint` fetched with `options`.
///
/// Distinct pages, filters, and query parameters get distinct keys.
pub fn cache_key(endpoint: &str, options: Option<&ListOptions>) -> String {
    match options {
        None => endpoint.to_string(),
        Some(options) => {
            let mut hasher = DefaultHasher::new();
            options.hash(&mut hasher);
            format!("{}:{:016x}", endpoint, hasher.finish())
        }
    }
}
