//! Core traits and types for the caching system.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::error::{ApiError, FetchError};

/// Trait for values that address a cache entry.
///
/// A key is derived from the logical query plus its parameters, so two
/// requests that would hit the same endpoint with the same arguments share
/// one entry.
pub trait CacheKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
  /// Human readable description used in logs and error messages.
  fn description(&self) -> String;
}

/// Factory producing one read against the backing API.
pub type FetchFn<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, ApiError>> + Send + Sync>;

/// Wrap a closure returning a future into a [`FetchFn`].
pub fn fetch_fn<V, F, Fut>(fetcher: F) -> FetchFn<V>
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: std::future::Future<Output = Result<V, ApiError>> + Send + 'static,
{
  Arc::new(move || Box::pin(fetcher()))
}

/// Freshness policy attached to an entry by its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
  /// Age after which data is served but refreshed in the background
  pub stale_time: Duration,
  /// Interval for background refresh while subscribed
  pub refetch_interval: Option<Duration>,
}

impl QueryOptions {
  pub fn new(stale_time: Duration) -> Self {
    Self {
      stale_time,
      refetch_interval: None,
    }
  }

  pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
    self.refetch_interval = Some(interval);
    self
  }
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self::new(Duration::ZERO)
  }
}

/// Lifecycle state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Nothing has been requested yet
  Idle,
  /// A fetch is in flight (previous data, if any, is still visible)
  Fetching,
  /// The latest applied fetch succeeded
  Success,
  /// The latest applied fetch failed
  Error,
}

/// Point-in-time view of an entry, as handed to callers and subscribers.
#[derive(Debug)]
pub struct CacheSnapshot<V> {
  pub data: Option<Arc<V>>,
  pub status: QueryStatus,
  pub error: Option<FetchError>,
  pub fetched_at: Option<Instant>,
  pub stale_time: Duration,
  pub invalidated: bool,
}

impl<V> CacheSnapshot<V> {
  pub(crate) fn idle(stale_time: Duration) -> Self {
    Self {
      data: None,
      status: QueryStatus::Idle,
      error: None,
      fetched_at: None,
      stale_time,
      invalidated: false,
    }
  }

  pub fn data(&self) -> Option<&V> {
    self.data.as_deref()
  }

  pub fn is_fetching(&self) -> bool {
    self.status == QueryStatus::Fetching
  }

  /// Whether the data is older than its stale time or has been invalidated.
  pub fn is_stale(&self) -> bool {
    self.invalidated
      || self
        .fetched_at
        .map(|t| t.elapsed() > self.stale_time)
        .unwrap_or(true)
  }

  /// No data yet and a fetch is running (or about to).
  pub fn is_loading(&self) -> bool {
    self.data.is_none() && matches!(self.status, QueryStatus::Fetching | QueryStatus::Idle)
  }
}

// Manual impl: `V` itself does not need to be `Clone`.
impl<V> Clone for CacheSnapshot<V> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      stale_time: self.stale_time,
      invalidated: self.invalidated,
    }
  }
}
