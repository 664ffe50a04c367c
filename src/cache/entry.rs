//! A single keyed cache entry and its freshness bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::traits::{CacheSnapshot, QueryOptions, QueryStatus};
use crate::error::FetchError;

/// Server data for one key plus the metadata needed to decide when to refresh.
///
/// `sequence` is bumped for every fetch issued; a response is applied only if
/// it carries the current value.
#[derive(Debug)]
pub struct CacheEntry<K, V> {
  pub key: K,
  pub data: Option<Arc<V>>,
  pub status: QueryStatus,
  pub error: Option<FetchError>,
  pub fetched_at: Option<Instant>,
  pub stale_after: Duration,
  pub refetch_interval: Option<Duration>,
  pub sequence: u64,
  /// Marked stale explicitly; cleared when the next fetch is issued
  pub invalidated: bool,
}

impl<K, V> CacheEntry<K, V> {
  pub fn new(key: K, options: QueryOptions) -> Self {
    Self {
      key,
      data: None,
      status: QueryStatus::Idle,
      error: None,
      fetched_at: None,
      stale_after: options.stale_time,
      refetch_interval: options.refetch_interval,
      sequence: 0,
      invalidated: false,
    }
  }

  /// Latest caller wins for the freshness policy.
  pub fn configure(&mut self, options: QueryOptions) {
    self.stale_after = options.stale_time;
    if options.refetch_interval.is_some() {
      self.refetch_interval = options.refetch_interval;
    }
  }

  /// `now - fetched_at > stale_after`, or explicitly invalidated, or never fetched.
  pub fn is_stale(&self, now: Instant) -> bool {
    self.invalidated
      || self
        .fetched_at
        .map(|t| now.saturating_duration_since(t) > self.stale_after)
        .unwrap_or(true)
  }

  /// Status to fall back to when a fetch is abandoned without a result.
  pub fn resting_status(&self) -> QueryStatus {
    if self.error.is_some() {
      QueryStatus::Error
    } else if self.data.is_some() {
      QueryStatus::Success
    } else {
      QueryStatus::Idle
    }
  }

  pub fn snapshot(&self) -> CacheSnapshot<V> {
    CacheSnapshot {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      stale_time: self.stale_after,
      invalidated: self.invalidated,
    }
  }
}
