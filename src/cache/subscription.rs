//! Subscriber handles and the refresh timers they own.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::layer::{CacheState, QueryCache};
use super::traits::{CacheKey, CacheSnapshot};

/// Background refresh for one subscription.
///
/// The task is aborted when the timer is dropped, so a subscription can never
/// leak periodic work past its own lifetime.
#[derive(Debug)]
pub struct RefreshTimer {
  handle: JoinHandle<()>,
  every: Duration,
}

impl RefreshTimer {
  pub(crate) fn spawn<K, V>(cache: Weak<CacheState<K, V>>, key: K, every: Duration) -> Self
  where
    K: CacheKey,
    V: Send + Sync + 'static,
  {
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(state) = cache.upgrade() else {
          break;
        };
        if !QueryCache::from_state(state).refresh_if_due(&key, every) {
          break;
        }
      }
      debug!(key = %key.description(), "refresh timer stopped");
    });
    Self { handle, every }
  }

  pub fn interval(&self) -> Duration {
    self.every
  }

  pub fn is_running(&self) -> bool {
    !self.handle.is_finished()
  }
}

impl Drop for RefreshTimer {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

/// A live view of one cache entry.
///
/// Dropping the subscription detaches it from the entry and stops its
/// refresh timer.
pub struct Subscription<K: CacheKey, V: Send + Sync + 'static> {
  key: K,
  rx: watch::Receiver<CacheSnapshot<V>>,
  cache: Weak<CacheState<K, V>>,
  timer: Option<RefreshTimer>,
}

impl<K: CacheKey, V: Send + Sync + 'static> Subscription<K, V> {
  pub(crate) fn new(
    key: K,
    rx: watch::Receiver<CacheSnapshot<V>>,
    cache: Weak<CacheState<K, V>>,
    timer: Option<RefreshTimer>,
  ) -> Self {
    Self {
      key,
      rx,
      cache,
      timer,
    }
  }

  pub fn key(&self) -> &K {
    &self.key
  }

  /// Latest published state of the entry.
  pub fn snapshot(&self) -> CacheSnapshot<V> {
    self.rx.borrow().clone()
  }

  /// Whether a new state was published since it was last seen.
  pub fn has_changed(&self) -> bool {
    self.rx.has_changed().unwrap_or(false)
  }

  /// Take the latest state and mark it seen.
  pub fn mark_seen(&mut self) -> CacheSnapshot<V> {
    self.rx.borrow_and_update().clone()
  }

  /// Wait for the next published state. Returns `None` once the cache has
  /// been torn down.
  pub async fn changed(&mut self) -> Option<CacheSnapshot<V>> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().clone())
  }

  pub fn refresh_timer(&self) -> Option<&RefreshTimer> {
    self.timer.as_ref()
  }

  /// Forced refresh of the subscribed entry, without waiting.
  pub fn refetch(&self) -> bool {
    match self.cache.upgrade() {
      Some(state) => QueryCache::from_state(state).refetch_in_background(&self.key),
      None => false,
    }
  }
}

impl<K: CacheKey, V: Send + Sync + 'static> Drop for Subscription<K, V> {
  fn drop(&mut self) {
    if let Some(state) = self.cache.upgrade() {
      QueryCache::from_state(state).unsubscribe(&self.key);
    }
    // Field drop order then aborts the timer.
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::layer::CacheConfig;
  use crate::cache::traits::{fetch_fn, FetchFn, QueryOptions, QueryStatus};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn counting(delay: Duration, calls: Arc<AtomicUsize>) -> FetchFn<u32> {
    fetch_fn(move || {
      let n = calls.fetch_add(1, Ordering::SeqCst) as u32;
      async move {
        tokio::time::sleep(delay).await;
        Ok(n)
      }
    })
  }

  fn refreshing(stale: u64, every: u64) -> QueryOptions {
    QueryOptions::new(Duration::from_secs(stale)).with_refetch_interval(Duration::from_secs(every))
  }

  #[tokio::test(start_paused = true)]
  async fn test_subscriber_sees_fetch_result() {
    let cache: QueryCache<&'static str, u32> = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut sub = cache.subscribe(
      "work-orders",
      counting(Duration::from_millis(10), calls.clone()),
      QueryOptions::default(),
    );

    assert!(sub.snapshot().is_loading());
    let snapshot = sub.changed().await.unwrap();
    assert_eq!(snapshot.status, QueryStatus::Success);
    assert_eq!(snapshot.data(), Some(&0));
    assert_eq!(cache.subscriber_count(&"work-orders"), 1);
    assert!(sub.refresh_timer().is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_background_refresh_runs_while_subscribed() {
    let cache: QueryCache<&'static str, u32> = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let sub = cache.subscribe(
      "schedule",
      counting(Duration::ZERO, calls.clone()),
      refreshing(30, 60),
    );
    assert_eq!(sub.refresh_timer().map(|t| t.interval()), Some(Duration::from_secs(60)));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    drop(sub);
    assert_eq!(cache.subscriber_count(&"schedule"), 0);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_two_subscribers_do_not_double_refresh() {
    let cache: QueryCache<&'static str, u32> = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = counting(Duration::ZERO, calls.clone());

    let first = cache.subscribe("machines", fetcher.clone(), refreshing(60, 120));
    tokio::time::sleep(Duration::from_secs(30)).await;
    let second = cache.subscribe("machines", fetcher, refreshing(60, 120));
    assert_eq!(cache.subscriber_count(&"machines"), 2);

    // Ticks at 120s (first) and 150s (second): only the first is due
    tokio::time::sleep(Duration::from_secs(125)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Dropping one subscriber keeps the other refreshing
    drop(first);
    tokio::time::sleep(Duration::from_secs(240)).await;
    assert!(calls.load(Ordering::SeqCst) >= 3);
    drop(second);
    let settled = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(calls.load(Ordering::SeqCst), settled);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_before_scheduled_refresh_does_not_overlap() {
    let cache: QueryCache<&'static str, u32> = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let fetcher = {
      let (calls, running, max_running) = (calls.clone(), running.clone(), max_running.clone());
      fetch_fn(move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) as u32;
        let (running, max_running) = (running.clone(), max_running.clone());
        async move {
          let now = running.fetch_add(1, Ordering::SeqCst) + 1;
          max_running.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_secs(2)).await;
          running.fetch_sub(1, Ordering::SeqCst);
          Ok(n)
        }
      })
    };

    let _sub = cache.subscribe("machines", fetcher, refreshing(60, 10));
    // Invalidate just before the timer fires; the tick lands mid-fetch
    tokio::time::sleep(Duration::from_secs(9)).await;
    cache.invalidate(&"machines");
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_teardown_ends_subscriptions() {
    let cache: QueryCache<&'static str, u32> = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut sub = cache.subscribe(
      "schedule",
      counting(Duration::ZERO, calls.clone()),
      refreshing(30, 60),
    );
    sub.changed().await.unwrap();

    cache.teardown();
    assert!(sub.changed().await.is_none());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!sub.refresh_timer().map(|t| t.is_running()).unwrap_or(true));
  }
}
