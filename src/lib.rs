//! # Cirrus - the core of a cloud infrastructure API client
//!
//! Cirrus is the typed, retry-aware request layer a cloud infrastructure
//! REST client is built on. Resource-specific calls (instances, volumes,
//! domains, ...) are thin wrappers over what this crate provides:
//! request execution with retries, page aggregation, a response cache, and
//! waiting for resources and events to settle.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cirrus::{Client, ListOptions};
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, Deserialize)]
//! struct Region {
//!     id: String,
//!     country: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cirrus::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com/v4")?
//!         .token("my-token")?
//!         .timeout(Duration::from_secs(30))
//!         .build()?;
//!
//!     // Every page, concatenated in server order.
//!     let regions: Vec<Region> = client.list_all("regions", None).await?;
//!     println!("{} regions", regions.len());
//!
//!     // A single page.
//!     let page = client
//!         .list_page::<Region>("regions", &ListOptions::new().page(2).page_size(25))
//!         .await?;
//!     println!("page {} of {}", page.page, page.pages);
//!
//!     // Served from the response cache on the second call.
//!     let cached: Vec<Region> = client.list_all_cached("regions", None, None).await?;
//!     println!("{} regions (cached)", cached.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Retries** - Busy resources, rate limiting, transient 5xx and dropped
//!   connections are retried with capped exponential backoff, honouring
//!   `Retry-After`
//! - **Normalised errors** - API error reasons are decoded into [`Error`];
//!   maintenance mode is reported separately and never retried
//! - **Pagination** - [`Client::list_all`] walks every page in order
//! - **Response cache** - Per-entry expiry, shared by client clones
//! - **Waits** - Poll a resource until a field reaches a value, or watch the
//!   account event feed until an action finishes
//! - **Listeners** - Batch many waits on one endpoint into a single request
//!   per poll cycle
//! - **Structured logging** - Attempts, retries, and wait progress are
//!   logged with `tracing`
//!
//! ## Retry Policies
//!
//! ```no_run
//! use cirrus::{Client, Error, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Error> {
//! let policy = RetryPolicy::default()
//!     .max_attempts(5)
//!     .wait_bounds(Duration::from_millis(200), Duration::from_secs(10))
//!     .with_condition(|e: &Error| e.has_status_code(&[409]));
//!
//! let client = Client::builder()
//!     .base_url("https://api.example.com/v4")?
//!     .retry_policy(policy)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod client;
mod error;
pub mod event;
pub mod filter;
pub mod listener;
pub mod metadata;
pub mod nullable;
pub mod pagination;
pub mod resource;
mod response;
pub mod retry;
pub mod timestamp;
pub mod transport;
pub mod wait;

pub use client::{Client, ClientBuilder, DEFAULT_POLL_INTERVAL};
pub use error::{ApiErrorReason, Error, Result};
pub use event::{Event, EventQuery};
pub use listener::{Listener, ResourceFuture};
pub use nullable::Nullable;
pub use pagination::{ListOptions, PaginatedResponse};
pub use resource::{HasStatus, Identified};
pub use response::Response;
pub use retry::{RetryConditional, RetryPolicy};
pub use wait::WaitTarget;
