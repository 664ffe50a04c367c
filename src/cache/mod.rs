//! Generic client-side query cache.
//!
//! This module is domain-agnostic. It provides:
//! - Keyed entries with stale-time / refetch-interval freshness policy
//! - De-duplication of concurrent reads of the same key
//! - Sequence-numbered responses so late, superseded results are dropped
//! - Subscriptions that own their background refresh timers
//! - Hold / commit / rollback hooks for optimistic updates

mod entry;
mod layer;
mod subscription;
mod traits;

pub use entry::CacheEntry;
pub use layer::{CacheConfig, QueryCache};
pub use subscription::{RefreshTimer, Subscription};
pub use traits::{fetch_fn, CacheKey, CacheSnapshot, FetchFn, QueryOptions, QueryStatus};

impl CacheKey for &'static str {
  fn description(&self) -> String {
    (*self).to_string()
  }
}

impl CacheKey for String {
  fn description(&self) -> String {
    self.clone()
  }
}
