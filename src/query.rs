//! View-facing query observer.
//!
//! Inspired by TanStack Query: a `Query<T>` is a typed window onto one cache
//! entry. Views poll it from their tick handler (or await `changed`) and
//! render from `state()`; they never touch the cache directly.
//!
//! # Example
//!
//! ```ignore
//! let mut schedule = dashboard.schedule("SAV100")?;
//!
//! // In event loop tick
//! if schedule.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match schedule.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(data) => render_schedule(data),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use crate::api::{Fetcher, ProductionCache, QueryData, QueryKey};
use crate::cache::{CacheKey, CacheSnapshot, QueryOptions, QueryStatus, Subscription};
use crate::error::FetchError;

/// What a view should render.
///
/// Data wins over errors: a failed background refresh keeps showing the
/// last good data.
#[derive(Debug)]
pub enum QueryState<'a, T> {
  /// Query has not been started
  Idle,
  /// No data yet, fetch in progress
  Loading,
  /// Data available (possibly stale or being refreshed)
  Success(&'a T),
  /// The latest fetch failed and there is no data to fall back on
  Error(&'a FetchError),
}

impl<T> QueryState<'_, T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }
}

/// Picks the typed payload out of a cache value.
pub type Projection<T> = fn(&QueryData) -> Option<&T>;

/// Live, typed view of one cache entry.
///
/// Holding a `Query` keeps its entry subscribed, including background
/// refresh when the entry has a refetch interval. Dropping it releases both.
pub struct Query<T> {
  subscription: Subscription<QueryKey, QueryData>,
  snapshot: CacheSnapshot<QueryData>,
  project: Projection<T>,
}

impl<T> Query<T> {
  pub(crate) fn subscribe(
    cache: &ProductionCache,
    fetcher: &Fetcher,
    key: QueryKey,
    options: QueryOptions,
    project: Projection<T>,
  ) -> Self {
    let fetch = fetcher.for_key(&key);
    let mut subscription = cache.subscribe(key, fetch, options);
    let snapshot = subscription.mark_seen();
    Self {
      subscription,
      snapshot,
      project,
    }
  }

  pub fn key(&self) -> &QueryKey {
    self.subscription.key()
  }

  /// Get the current state of the query.
  pub fn state(&self) -> QueryState<'_, T> {
    if let Some(data) = self.data() {
      return QueryState::Success(data);
    }
    match (&self.snapshot.error, self.snapshot.status) {
      (Some(error), QueryStatus::Error) => QueryState::Error(error),
      (_, QueryStatus::Idle) => QueryState::Idle,
      _ => QueryState::Loading,
    }
  }

  /// Get the data, if any has been loaded.
  pub fn data(&self) -> Option<&T> {
    self.snapshot.data().and_then(self.project)
  }

  /// No data yet and a fetch is running.
  pub fn is_loading(&self) -> bool {
    self.state().is_loading()
  }

  /// A fetch is running, with or without data already shown.
  pub fn is_fetching(&self) -> bool {
    self.snapshot.is_fetching()
  }

  pub fn is_error(&self) -> bool {
    self.snapshot.status == QueryStatus::Error
  }

  /// Error of the latest fetch, even when older data is still shown.
  pub fn error(&self) -> Option<&FetchError> {
    self.snapshot.error.as_ref()
  }

  /// Check if the data is stale (older than stale_time, or invalidated).
  pub fn is_stale(&self) -> bool {
    self.snapshot.data.is_some() && self.snapshot.is_stale()
  }

  pub fn has_refresh_timer(&self) -> bool {
    self.subscription.refresh_timer().is_some()
  }

  /// Force a refetch, superseding any fetch already in flight.
  pub fn refetch(&self) -> bool {
    self.subscription.refetch()
  }

  /// Pick up the latest entry state.
  ///
  /// Returns `true` if the state changed since the last poll. Call this in
  /// your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    if !self.subscription.has_changed() {
      return false;
    }
    self.snapshot = self.subscription.mark_seen();
    true
  }

  /// Wait for the next change. Returns `false` once the cache is torn down.
  pub async fn changed(&mut self) -> bool {
    match self.subscription.changed().await {
      Some(snapshot) => {
        self.snapshot = snapshot;
        true
      }
      None => false,
    }
  }

  /// Wait until no fetch is pending, then return the data or the error.
  pub async fn settled(&mut self) -> Result<&T, FetchError> {
    self.poll();
    while matches!(self.snapshot.status, QueryStatus::Fetching | QueryStatus::Idle) {
      if !self.changed().await {
        return Err(FetchError::Cancelled {
          key: self.key().description(),
        });
      }
    }
    if let Some(error) = &self.snapshot.error {
      if self.data().is_none() {
        return Err(error.clone());
      }
    }
    self.data().ok_or_else(|| FetchError::Cancelled {
      key: self.key().description(),
    })
  }
}

impl<T> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", self.key())
      .field("status", &self.snapshot.status)
      .field("fetched_at", &self.snapshot.fetched_at)
      .field("stale_time", &self.snapshot.stale_time)
      .finish_non_exhaustive()
  }
}
