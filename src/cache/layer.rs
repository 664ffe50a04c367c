//! Query cache that orchestrates freshness, de-duplication and refresh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::subscription::{RefreshTimer, Subscription};
use super::traits::{CacheKey, CacheSnapshot, FetchFn, QueryOptions, QueryStatus};
use crate::error::{ApiError, FetchError};

/// Outcome of one fetch, shared by every caller that joined it.
type SharedFetch<V> = Shared<BoxFuture<'static, Result<Arc<V>, FetchError>>>;

/// Cache-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
  /// Upper bound for a single fetch; expiry is reported as a fetch error
  pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      fetch_timeout: Duration::from_secs(15),
    }
  }
}

struct InFlight<V> {
  sequence: u64,
  result: SharedFetch<V>,
  abort: AbortHandle,
}

struct Slot<K, V> {
  entry: CacheEntry<K, V>,
  fetcher: Option<FetchFn<V>>,
  in_flight: Option<InFlight<V>>,
  /// Pending optimistic updates on this entry
  holds: usize,
  subscribers: usize,
  last_started: Option<Instant>,
  tx: watch::Sender<CacheSnapshot<V>>,
}

impl<K, V> Slot<K, V> {
  fn new(key: K, options: QueryOptions) -> Self {
    let entry = CacheEntry::new(key, options);
    let (tx, _rx) = watch::channel(entry.snapshot());
    Self {
      entry,
      fetcher: None,
      in_flight: None,
      holds: 0,
      subscribers: 0,
      last_started: None,
      tx,
    }
  }

  fn publish(&self) {
    self.tx.send_replace(self.entry.snapshot());
  }

  fn wants_fetch(&self, now: Instant) -> bool {
    self.fetcher.is_some()
      && self.in_flight.is_none()
      && self.entry.is_stale(now)
      && (self.holds == 0 || self.entry.data.is_none())
  }
}

pub(crate) struct CacheState<K, V> {
  entries: Mutex<HashMap<K, Slot<K, V>>>,
  config: CacheConfig,
  closed: AtomicBool,
}

/// Keyed store of server data.
///
/// Owns every entry's lifetime. Reads go through [`get`](Self::get),
/// [`fetch`](Self::fetch) or [`subscribe`](Self::subscribe); writes only
/// through invalidation and the optimistic update hooks used by the mutation
/// executor.
pub struct QueryCache<K, V> {
  state: Arc<CacheState<K, V>>,
}

impl<K, V> Clone for QueryCache<K, V> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
    }
  }
}

impl<K, V> std::fmt::Debug for QueryCache<K, V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryCache")
      .field("config", &self.state.config)
      .field("closed", &self.state.closed.load(Ordering::Acquire))
      .finish_non_exhaustive()
  }
}

impl<K: CacheKey, V: Send + Sync + 'static> QueryCache<K, V> {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      state: Arc::new(CacheState {
        entries: Mutex::new(HashMap::new()),
        config,
        closed: AtomicBool::new(false),
      }),
    }
  }

  pub(crate) fn from_state(state: Arc<CacheState<K, V>>) -> Self {
    Self { state }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<K, V>>> {
    // Entry updates never panic midway, so a poisoned map is still consistent.
    self
      .state
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  pub fn is_closed(&self) -> bool {
    self.state.closed.load(Ordering::Acquire)
  }

  /// Return the current entry immediately, starting a fetch when the entry is
  /// missing or stale and nothing is in flight.
  pub fn get(&self, key: K, fetcher: FetchFn<V>, options: QueryOptions) -> CacheSnapshot<V> {
    if self.is_closed() {
      return CacheSnapshot::idle(options.stale_time);
    }
    let now = Instant::now();
    let mut entries = self.lock();
    let slot = register(&mut entries, key, fetcher, options);
    if slot.wants_fetch(now) {
      let _ = self.start_fetch(slot, now);
    }
    slot.entry.snapshot()
  }

  /// Resolve to fresh data: cached data when still fresh, otherwise the result
  /// of the in-flight fetch (joining it) or of a newly started one.
  pub async fn fetch(
    &self,
    key: K,
    fetcher: FetchFn<V>,
    options: QueryOptions,
  ) -> Result<Arc<V>, FetchError> {
    let pending = {
      if self.is_closed() {
        return Err(FetchError::Cancelled {
          key: key.description(),
        });
      }
      let now = Instant::now();
      let mut entries = self.lock();
      let slot = register(&mut entries, key, fetcher, options);
      if let Some(data) = &slot.entry.data {
        // Held entries serve their optimistic data until the mutation settles.
        if !slot.entry.is_stale(now) || slot.holds > 0 {
          return Ok(Arc::clone(data));
        }
      }
      let joined = slot.in_flight.as_ref().map(|flight| flight.result.clone());
      match joined {
        Some(result) => result,
        None => self.start_fetch(slot, now),
      }
    };
    pending.await
  }

  /// Register a subscriber. Starts a fetch if needed and, when the options
  /// carry a refetch interval, a refresh timer owned by the subscription.
  pub fn subscribe(&self, key: K, fetcher: FetchFn<V>, options: QueryOptions) -> Subscription<K, V> {
    if self.is_closed() {
      let (_tx, rx) = watch::channel(CacheSnapshot::idle(options.stale_time));
      return Subscription::new(key, rx, Arc::downgrade(&self.state), None);
    }

    let now = Instant::now();
    let rx = {
      let mut entries = self.lock();
      let slot = register(&mut entries, key.clone(), fetcher, options);
      slot.subscribers += 1;
      if slot.wants_fetch(now) {
        let _ = self.start_fetch(slot, now);
      }
      slot.tx.subscribe()
    };

    let timer = options
      .refetch_interval
      .filter(|every| !every.is_zero())
      .map(|every| RefreshTimer::spawn(Arc::downgrade(&self.state), key.clone(), every));

    Subscription::new(key, rx, Arc::downgrade(&self.state), timer)
  }

  /// Forced refresh: issues a new request, superseding any fetch in flight.
  ///
  /// A held entry keeps its optimistic data; the refresh is deferred until
  /// the hold is released and the current data is returned.
  pub async fn refetch(&self, key: &K) -> Result<Arc<V>, FetchError> {
    let pending = {
      let mut entries = self.lock();
      match entries.get_mut(key) {
        Some(slot) if slot.fetcher.is_some() && !self.is_closed() => {
          if let Some(data) = defer_if_held(slot) {
            return Ok(data);
          }
          self.start_fetch(slot, Instant::now())
        }
        _ => {
          return Err(FetchError::NoFetcher {
            key: key.description(),
          })
        }
      }
    };
    pending.await
  }

  /// Forced refresh without waiting for the result. Returns `false` if the
  /// key was never loaded.
  pub fn refetch_in_background(&self, key: &K) -> bool {
    let mut entries = self.lock();
    match entries.get_mut(key) {
      Some(slot) if slot.fetcher.is_some() && !self.is_closed() => {
        if defer_if_held(slot).is_none() {
          let _ = self.start_fetch(slot, Instant::now());
        }
        true
      }
      _ => false,
    }
  }

  /// Mark an entry stale and schedule a refetch. Data stays visible meanwhile.
  ///
  /// Returns `false` if the key has no entry.
  pub fn invalidate(&self, key: &K) -> bool {
    let now = Instant::now();
    let mut entries = self.lock();
    match entries.get_mut(key) {
      Some(slot) => {
        self.invalidate_slot(slot, now);
        true
      }
      None => false,
    }
  }

  /// Invalidate every entry whose key matches. Returns the number of entries hit.
  pub fn invalidate_matching(&self, matches: impl Fn(&K) -> bool) -> usize {
    let now = Instant::now();
    let mut entries = self.lock();
    let mut count = 0;
    for slot in entries.values_mut().filter(|s| matches(&s.entry.key)) {
      self.invalidate_slot(slot, now);
      count += 1;
    }
    count
  }

  fn invalidate_slot(&self, slot: &mut Slot<K, V>, now: Instant) {
    slot.entry.invalidated = true;
    if slot.in_flight.is_some() {
      // The running fetch may predate the change; one follow-up fetch is
      // issued when it lands instead of a second overlapping request.
      debug!(key = %slot.entry.key.description(), "invalidated while in flight");
    } else if slot.holds == 0 && slot.fetcher.is_some() && !self.is_closed() {
      let _ = self.start_fetch(slot, now);
      return;
    }
    slot.publish();
  }

  /// Current snapshot of an entry without triggering anything.
  pub fn peek(&self, key: &K) -> Option<CacheSnapshot<V>> {
    self.lock().get(key).map(|slot| slot.entry.snapshot())
  }

  /// Keys currently present in the cache that match.
  pub fn keys_matching(&self, matches: impl Fn(&K) -> bool) -> Vec<K> {
    self
      .lock()
      .keys()
      .filter(|key| matches(key))
      .cloned()
      .collect()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Number of live subscriptions on a key.
  pub fn subscriber_count(&self, key: &K) -> usize {
    self.lock().get(key).map(|slot| slot.subscribers).unwrap_or(0)
  }

  /// Replace an entry's data with `update(current)` and hold the entry until
  /// [`commit_optimistic`](Self::commit_optimistic) or
  /// [`rollback_optimistic`](Self::rollback_optimistic).
  ///
  /// `update` returns the new data plus whatever the caller needs to undo it.
  /// Nothing happens (and `None` is returned) when the entry has no data or
  /// `update` declines. An in-flight fetch is superseded so its response
  /// cannot overwrite the optimistic state.
  pub fn apply_optimistic<R>(
    &self,
    key: &K,
    update: impl FnOnce(&V) -> Option<(V, R)>,
  ) -> Option<R> {
    let mut entries = self.lock();
    let slot = entries.get_mut(key)?;
    let (next, undo) = update(slot.entry.data.as_deref()?)?;

    slot.holds += 1;
    if let Some(flight) = slot.in_flight.take() {
      slot.entry.sequence += 1;
      slot.entry.invalidated = true;
      slot.entry.status = slot.entry.resting_status();
      debug!(
        key = %slot.entry.key.description(),
        sequence = flight.sequence,
        "superseded in-flight fetch for optimistic update"
      );
    }
    slot.entry.data = Some(Arc::new(next));
    slot.publish();
    Some(undo)
  }

  /// Release a hold after the write succeeded.
  pub fn commit_optimistic(&self, key: &K) {
    let now = Instant::now();
    let mut entries = self.lock();
    if let Some(slot) = entries.get_mut(key) {
      self.release(slot, now);
    }
  }

  /// Undo an optimistic update, then release its hold.
  pub fn rollback_optimistic(&self, key: &K, undo: impl FnOnce(&V) -> Option<V>) {
    let now = Instant::now();
    let mut entries = self.lock();
    let Some(slot) = entries.get_mut(key) else {
      return;
    };
    if let Some(restored) = slot.entry.data.as_deref().and_then(undo) {
      slot.entry.data = Some(Arc::new(restored));
    }
    slot.publish();
    self.release(slot, now);
  }

  fn release(&self, slot: &mut Slot<K, V>, now: Instant) {
    slot.holds = slot.holds.saturating_sub(1);
    // Refreshes deferred while held run now.
    if slot.holds == 0
      && slot.entry.invalidated
      && slot.in_flight.is_none()
      && slot.fetcher.is_some()
      && !self.is_closed()
    {
      let _ = self.start_fetch(slot, now);
    }
  }

  /// Called by a subscription's refresh timer. Returns `false` once the timer
  /// should stop.
  pub(crate) fn refresh_if_due(&self, key: &K, every: Duration) -> bool {
    if self.is_closed() {
      return false;
    }
    let now = Instant::now();
    let mut entries = self.lock();
    let Some(slot) = entries.get_mut(key) else {
      return false;
    };
    if slot.in_flight.is_some() || slot.holds > 0 || slot.fetcher.is_none() {
      return true;
    }
    let due = slot.entry.invalidated
      || slot
        .last_started
        .map(|t| now.saturating_duration_since(t) >= every)
        .unwrap_or(true);
    if due {
      debug!(key = %key.description(), "background refresh");
      let _ = self.start_fetch(slot, now);
    }
    true
  }

  pub(crate) fn unsubscribe(&self, key: &K) {
    if let Some(slot) = self.lock().get_mut(key) {
      slot.subscribers = slot.subscribers.saturating_sub(1);
    }
  }

  /// Drop every entry, abort in-flight fetches and stop all refresh timers.
  pub fn teardown(&self) {
    self.state.closed.store(true, Ordering::Release);
    let mut entries = self.lock();
    for slot in entries.values() {
      if let Some(flight) = &slot.in_flight {
        flight.abort.abort();
      }
    }
    let count = entries.len();
    entries.clear();
    debug!(entries = count, "query cache torn down");
  }

  fn start_fetch(&self, slot: &mut Slot<K, V>, now: Instant) -> SharedFetch<V> {
    let key = slot.entry.key.clone();
    let Some(fetcher) = slot.fetcher.clone() else {
      return future::ready(Err(FetchError::NoFetcher {
        key: key.description(),
      }))
      .boxed()
      .shared();
    };

    slot.entry.sequence += 1;
    let sequence = slot.entry.sequence;
    slot.entry.status = QueryStatus::Fetching;
    slot.entry.invalidated = false;
    slot.last_started = Some(now);
    debug!(key = %key.description(), sequence, "fetch started");

    let request = fetcher();
    let state = Arc::downgrade(&self.state);
    let timeout = self.state.config.fetch_timeout;
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
      let outcome = match tokio::time::timeout(timeout, request).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ApiError::Timeout {
          endpoint: task_key.description(),
        }),
      };
      match state.upgrade() {
        Some(state) => QueryCache::from_state(state).complete(&task_key, sequence, outcome),
        None => outcome
          .map(Arc::new)
          .map_err(|e| FetchError::api(task_key.description(), e)),
      }
    });

    let abort = handle.abort_handle();
    let description = key.description();
    let result = async move {
      handle
        .await
        .unwrap_or_else(|_| Err(FetchError::Cancelled { key: description }))
    }
    .boxed()
    .shared();

    slot.in_flight = Some(InFlight {
      sequence,
      result: result.clone(),
      abort,
    });
    slot.publish();
    result
  }

  fn complete(
    &self,
    key: &K,
    sequence: u64,
    outcome: Result<V, ApiError>,
  ) -> Result<Arc<V>, FetchError> {
    let result = outcome
      .map(Arc::new)
      .map_err(|e| FetchError::api(key.description(), e));

    let now = Instant::now();
    let mut entries = self.lock();
    let Some(slot) = entries.get_mut(key) else {
      return result;
    };
    if slot.entry.sequence != sequence {
      debug!(
        key = %key.description(),
        sequence,
        current = slot.entry.sequence,
        "discarding superseded response"
      );
      return result;
    }

    slot.in_flight = None;
    match &result {
      Ok(_) if slot.holds > 0 => {
        // Optimistic data wins; the refresh runs again once released.
        slot.entry.invalidated = true;
        slot.entry.status = slot.entry.resting_status();
        debug!(key = %key.description(), sequence, "response held back by pending update");
      }
      Ok(data) => {
        slot.entry.data = Some(Arc::clone(data));
        slot.entry.status = QueryStatus::Success;
        slot.entry.error = None;
        slot.entry.fetched_at = Some(now);
        debug!(key = %key.description(), sequence, "fetch applied");
      }
      Err(e) => {
        // Previous data stays visible alongside the error.
        slot.entry.status = QueryStatus::Error;
        slot.entry.error = Some(e.clone());
        warn!(key = %key.description(), sequence, error = %e, "fetch failed");
      }
    }

    if slot.entry.invalidated && slot.holds == 0 && !self.is_closed() {
      let _ = self.start_fetch(slot, now);
    } else {
      slot.publish();
    }
    result
  }
}

/// Mark a held entry for refresh on release and hand back its data.
fn defer_if_held<K: CacheKey, V>(slot: &mut Slot<K, V>) -> Option<Arc<V>> {
  if slot.holds == 0 {
    return None;
  }
  let data = slot.entry.data.clone()?;
  slot.entry.invalidated = true;
  slot.publish();
  debug!(key = %slot.entry.key.description(), "refetch deferred by pending update");
  Some(data)
}

fn register<K: CacheKey, V>(
  entries: &mut HashMap<K, Slot<K, V>>,
  key: K,
  fetcher: FetchFn<V>,
  options: QueryOptions,
) -> &mut Slot<K, V> {
  let slot = entries
    .entry(key.clone())
    .or_insert_with(|| Slot::new(key, options));
  slot.entry.configure(options);
  slot.fetcher = Some(fetcher);
  slot
}
