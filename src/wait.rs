//! Waiting for resources to reach a state.
//!
//! Every wait follows the same state machine: poll on the client's poll
//! interval until the predicate holds (success), the fetch fails (the error
//! is returned as-is, retries having already happened in the transport
//! layer), or the deadline passes ([`Error::WaitTimeout`]). The first poll
//! happens one interval after the wait starts.
//!
//! A wait is cancelled by dropping its future; any in-flight request is
//! dropped with it.

use crate::{
    resource::{HasStatus, Identified},
    Client, Error, Response, Result,
};
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Describes what a wait is waiting for, for logs and timeout errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTarget {
    /// The kind of resource, e.g. `"instance"`.
    pub resource: String,
    /// The resource identifier.
    pub id: String,
    /// The watched field, e.g. `"status"`.
    pub field: String,
    /// The awaited value of the field.
    pub expected: String,
}

impl WaitTarget {
    /// Waits for `field` of `resource` `id` to become `expected`.
    pub fn new(
        resource: impl Into<String>,
        id: impl fmt::Display,
        field: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            id: id.to_string(),
            field: field.into(),
            expected: expected.into(),
        }
    }

    /// Waits for the `status` field of `resource` `id` to become `expected`.
    pub fn status(resource: impl Into<String>, id: impl fmt::Display, expected: impl Into<String>) -> Self {
        Self::new(resource, id, "status", expected)
    }

    pub(crate) fn timeout_error(&self) -> Error {
        Error::WaitTimeout {
            resource: self.resource.clone(),
            id: self.id.clone(),
            field: self.field.clone(),
            expected: self.expected.clone(),
        }
    }
}

impl fmt::Display for WaitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} '{}'", self.resource, self.id, self.field, self.expected)
    }
}

/// A ticker whose first tick fires one `period` from now.
pub(crate) fn poll_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl Client {
    /// Polls `getter` until `predicate` accepts its value or `timeout` passes.
    ///
    /// # Examples
    ///
    /// Waiting for a volume to be attached to instance 123:
    ///
    /// ```no_run
    /// use cirrus::{Client, WaitTarget};
    /// use serde::Deserialize;
    /// use std::time::Duration;
    ///
    /// #[derive(Deserialize)]
    /// struct Volume {
    ///     linode_id: Option<u64>,
    /// }
    ///
    /// # async fn example(client: Client) -> Result<(), cirrus::Error> {
    /// let target = WaitTarget::new("volume", 12, "linode_id", "123");
    /// let volume = client
    ///     .wait_for(
    ///         &target,
    ///         || async { Ok(client.get::<Volume>("volumes/12").await?.data) },
    ///         |v: &Volume| v.linode_id == Some(123),
    ///         Duration::from_secs(300),
    ///     )
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn wait_for<T, G, Fut, P>(
        &self,
        target: &WaitTarget,
        mut getter: G,
        predicate: P,
        timeout: Duration,
    ) -> Result<T>
    where
        G: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&T) -> bool,
    {
        tracing::debug!(
            waiting_for = %target,
            timeout_secs = timeout.as_secs(),
            "Waiting for resource"
        );

        let poll = async {
            let mut ticker = poll_ticker(self.poll_interval());
            loop {
                ticker.tick().await;
                let value = getter().await?;
                if predicate(&value) {
                    tracing::info!(waiting_for = %target, "Resource reached target state");
                    return Ok(value);
                }
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(waiting_for = %target, "Timed out waiting for resource");
                Err(target.timeout_error())
            }
        }
    }

    /// Re-fetches `endpoint` until its `status` equals `target.expected`.
    pub async fn wait_for_status<T>(
        &self,
        endpoint: &str,
        target: &WaitTarget,
        timeout: Duration,
    ) -> Result<T>
    where
        T: DeserializeOwned + HasStatus,
    {
        let client = self;
        self.wait_for(
            target,
            move || async move { client.get::<T>(endpoint).await.map(Response::into_data) },
            |resource: &T| resource.status() == target.expected,
            timeout,
        )
        .await
    }

    /// Lists `endpoint` until the item with `id` has `status` equal to
    /// `target.expected`.
    ///
    /// For child resources that show up in their parent's collection before
    /// they can be fetched individually. An item missing from the listing
    /// counts as "not there yet".
    pub async fn wait_for_list_item<T>(
        &self,
        endpoint: &str,
        id: u64,
        target: &WaitTarget,
        timeout: Duration,
    ) -> Result<T>
    where
        T: DeserializeOwned + Identified + HasStatus,
    {
        let client = self;
        let found = self
            .wait_for(
                target,
                move || async move {
                    let items = client.list_all::<T>(endpoint, None).await?;
                    Ok(items.into_iter().find(|item| item.id() == id))
                },
                |item: &Option<T>| {
                    item.as_ref()
                        .is_some_and(|item| item.status() == target.expected)
                },
                timeout,
            )
            .await?;

        found.ok_or_else(|| target.timeout_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client(poll_interval: Duration) -> Client {
        Client::builder()
            .base_url("https://api.example.com/v4")
            .unwrap()
            .poll_interval(poll_interval)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_predicate_matches() {
        let client = client(Duration::from_secs(1));
        let calls = AtomicUsize::new(0);
        let target = WaitTarget::status("instance", 1, "running");

        let start = Instant::now();
        let value = client
            .wait_for(
                &target,
                || async { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) },
                |n: &usize| *n == 3,
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_one_interval() {
        let interval = Duration::from_secs(2);
        let client = client(interval);
        let target = WaitTarget::status("volume", 9, "active");

        let start = Instant::now();
        let err = client
            .wait_for(
                &target,
                || async { Ok("creating") },
                |s: &&str| *s == "active",
                Duration::from_secs(7),
            )
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(7));
        assert!(elapsed <= Duration::from_secs(7) + interval);
        match err {
            Error::WaitTimeout {
                resource,
                id,
                field,
                expected,
            } => {
                assert_eq!(resource, "volume");
                assert_eq!(id, "9");
                assert_eq!(field, "status");
                assert_eq!(expected, "active");
            }
            other => panic!("Expected WaitTimeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_getter_error_aborts_wait() {
        let client = client(Duration::from_secs(1));
        let target = WaitTarget::status("instance", 1, "running");

        let result: Result<&str> = client
            .wait_for(
                &target,
                || async { Err(Error::ConfigurationError("boom".to_string())) },
                |_: &&str| true,
                Duration::from_secs(60),
            )
            .await;

        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }
}
