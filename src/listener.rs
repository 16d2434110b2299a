//! Batched polling for many resources of one endpoint.
//!
//! A [`Listener`] keeps a registry of pending futures keyed by resource id.
//! Each poll cycle lists every pending id in a single request (an `+or`
//! filter over the ids) and delivers a resource to its future the first
//! time the future's predicate accepts it. A resolved future stays
//! registered, but is no longer polled, until it is unregistered.
//!
//! ```no_run
//! use cirrus::{Client, Identified, Listener};
//! use serde::Deserialize;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug, Deserialize)]
//! struct Instance {
//!     id: u64,
//!     status: String,
//! }
//!
//! impl Identified for Instance {
//!     fn id(&self) -> u64 {
//!         self.id
//!     }
//! }
//!
//! # async fn example(client: Client) -> Result<(), cirrus::Error> {
//! let listener = Arc::new(Listener::<Instance>::new(client, "linode/instances"));
//! let mut running = listener.register(42, |i: &Instance| i.status == "running")?;
//!
//! let cancel = CancellationToken::new();
//! let mut errors = listener.poll(Duration::from_secs(3), cancel.clone())?;
//!
//! tokio::select! {
//!     Some(instance) = running.recv() => println!("{} is running", instance.id),
//!     Some(err) = errors.recv() => eprintln!("poll failed: {}", err),
//! }
//!
//! cancel.cancel();
//! listener.unregister(42)?;
//! # Ok(())
//! # }
//! ```

use crate::{
    filter::{Comparison, Filter},
    pagination::ListOptions,
    resource::Identified,
    wait::poll_ticker,
    Client, Error, Result,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the error channel returned by [`Listener::poll`].
const ERROR_CHANNEL_CAPACITY: usize = 16;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// What [`Listener::register`] does when the id already has a future.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Replace the existing future, which is closed.
    #[default]
    Overwrite,
    /// Fail with [`Error::FutureAlreadyRegistered`].
    Reject,
}

/// The receiving side of a registration.
///
/// Yields the matching resource once. Yields `None` after the registration
/// is removed or replaced.
///
/// The channel holds exactly one resource, so delivery never waits on the
/// caller. A future that is never read keeps its resource buffered until
/// it is dropped or unregistered; callers that stop caring about a
/// resource should unregister it.
pub struct ResourceFuture<T> {
    id: u64,
    receiver: mpsc::Receiver<T>,
}

impl<T> ResourceFuture<T> {
    /// The id this future was registered for.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the resource to satisfy the predicate.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns the resource if it has already been delivered.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> fmt::Debug for ResourceFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceFuture").field("id", &self.id).finish()
    }
}

struct Registration<T> {
    predicate: Predicate<T>,
    sender: mpsc::Sender<T>,
    resolved: bool,
}

/// Polls one list endpoint on behalf of many waiting callers.
///
/// Each future receives at most one resource and its channel has room for
/// it, so a poll cycle never blocks on a slow reader. Reading from the
/// future, and unregistering it afterwards, is up to the caller.
pub struct Listener<T> {
    client: Client,
    endpoint: String,
    duplicates: DuplicatePolicy,
    registry: Mutex<HashMap<u64, Registration<T>>>,
}

impl<T> Listener<T>
where
    T: Identified + DeserializeOwned + Send + 'static,
{
    /// Creates a listener over the list endpoint `endpoint`.
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            duplicates: DuplicatePolicy::default(),
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Sets how duplicate registrations are handled.
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Registers interest in resource `id`, resolved once `predicate` holds.
    pub fn register<P>(&self, id: u64, predicate: P) -> Result<ResourceFuture<T>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel(1);
        let registration = Registration {
            predicate: Box::new(predicate),
            sender,
            resolved: false,
        };

        let mut registry = self.registry.lock();
        if registry.contains_key(&id) {
            match self.duplicates {
                DuplicatePolicy::Reject => return Err(Error::FutureAlreadyRegistered { id }),
                DuplicatePolicy::Overwrite => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        id,
                        "Replacing existing future for resource"
                    );
                }
            }
        }
        registry.insert(id, registration);

        Ok(ResourceFuture { id, receiver })
    }

    /// Removes the future for `id`, closing its channel.
    pub fn unregister(&self, id: u64) -> Result<()> {
        match self.registry.lock().remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::FutureNotFound { id }),
        }
    }

    /// Number of registered futures, resolved or not.
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Number of futures still waiting for their resource.
    pub fn pending(&self) -> usize {
        self.registry.lock().values().filter(|r| !r.resolved).count()
    }

    fn pending_filter(&self) -> Option<Filter> {
        let mut ids: Vec<u64> = self
            .registry
            .lock()
            .iter()
            .filter(|(_, r)| !r.resolved)
            .map(|(id, _)| *id)
            .collect();
        if ids.is_empty() {
            return None;
        }
        ids.sort_unstable();
        Some(Filter::or(ids.into_iter().map(|id| Comparison::eq("id", id))))
    }

    /// Runs a single poll cycle.
    ///
    /// Fails without delivering anything if the listing contains an id with
    /// no registered future. Does nothing when no future is pending.
    pub async fn poll_once(&self) -> Result<()> {
        let Some(filter) = self.pending_filter() else {
            return Ok(());
        };

        let options = ListOptions::new().page(1).filter(filter.to_string());
        let resources = self
            .client
            .list_page::<T>(&self.endpoint, &options)
            .await?
            .data;

        let deliveries = {
            let registry = self.registry.lock();
            if let Some(stray) = resources.iter().find(|r| !registry.contains_key(&r.id())) {
                return Err(Error::UnexpectedResource { id: stray.id() });
            }

            let mut deliveries = Vec::new();
            for resource in resources {
                let id = resource.id();
                let Some(registration) = registry.get(&id) else {
                    continue;
                };
                if !registration.resolved && (registration.predicate)(&resource) {
                    deliveries.push((id, registration.sender.clone(), resource));
                }
            }
            deliveries
        };

        for (id, sender, resource) in deliveries {
            if sender.send(resource).await.is_err() {
                tracing::debug!(endpoint = %self.endpoint, id, "Future dropped before delivery");
                continue;
            }
            // Skip if the registration was replaced while sending.
            if let Some(registration) = self.registry.lock().get_mut(&id) {
                if registration.sender.same_channel(&sender) {
                    registration.resolved = true;
                }
            }
            tracing::debug!(endpoint = %self.endpoint, id, "Delivered resource to future");
        }

        Ok(())
    }

    /// Spawns a task that runs a poll cycle every `interval` until `cancel`
    /// fires.
    ///
    /// Cycle failures are sent on the returned channel and polling goes on.
    /// On cancellation [`Error::Cancelled`] is sent and the task stops; it
    /// also stops once the returned receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if `interval` is zero.
    pub fn poll(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Error>> {
        if interval.is_zero() {
            return Err(Error::ConfigurationError(
                "Listener poll interval must be greater than zero".to_string(),
            ));
        }

        let (errors, receiver) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let listener = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = poll_ticker(interval);
            loop {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        result = listener.poll_once() => result,
                    },
                };

                if let Err(err) = result {
                    tracing::warn!(
                        endpoint = %listener.endpoint,
                        error = %err,
                        "Listener poll cycle failed"
                    );
                    // A full error channel must not hide cancellation.
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = errors.send(err) => sent,
                    };
                    if sent.is_err() {
                        return;
                    }
                }
            }

            tracing::debug!(endpoint = %listener.endpoint, "Listener cancelled");
            let _ = errors.send(Error::Cancelled).await;
        });

        Ok(receiver)
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("endpoint", &self.endpoint)
            .field("duplicates", &self.duplicates)
            .field("registered", &self.registry.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Volume {
        id: u64,
    }

    impl Identified for Volume {
        fn id(&self) -> u64 {
            self.id
        }
    }

    fn listener() -> Listener<Volume> {
        let client = Client::builder()
            .base_url("https://api.example.com/v4")
            .unwrap()
            .build()
            .unwrap();
        Listener::new(client, "volumes")
    }

    #[test]
    fn test_filter_lists_pending_ids_in_order() {
        let listener = listener();
        listener.register(7, |_| true).unwrap();
        listener.register(3, |_| true).unwrap();

        let filter = listener.pending_filter().unwrap();
        assert_eq!(
            filter.to_value(),
            serde_json::json!({"+or": [{"id": 3}, {"id": 7}]})
        );
    }

    #[test]
    fn test_no_filter_without_pending_futures() {
        assert!(listener().pending_filter().is_none());
    }

    #[test]
    fn test_reject_policy_refuses_duplicates() {
        let listener = listener().with_duplicate_policy(DuplicatePolicy::Reject);
        listener.register(1, |_| true).unwrap();
        let err = listener.register(1, |_| true).unwrap_err();
        assert!(matches!(err, Error::FutureAlreadyRegistered { id: 1 }));
        assert_eq!(listener.len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_closes_previous_future() {
        let listener = listener();
        let mut first = listener.register(1, |_| true).unwrap();
        let _second = listener.register(1, |_| true).unwrap();
        assert_eq!(first.recv().await.map(|v| v.id), None);
        assert_eq!(listener.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_closes_channel() {
        let listener = listener();
        let mut future = listener.register(5, |_| true).unwrap();
        listener.unregister(5).unwrap();
        assert!(future.recv().await.is_none());
        assert!(matches!(
            listener.unregister(5),
            Err(Error::FutureNotFound { id: 5 })
        ));
    }
}
