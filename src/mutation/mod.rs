//! Optimistic writes against the production API.
//!
//! A [`Mutation`] describes one write: which entity it touches, how to
//! apply it to cached data ahead of the server, and which cache keys become
//! stale once the server accepts it. [`MutationExecutor`] runs it:
//!
//! 1. validate, lease the entity and apply the optimistic state (synchronous,
//!    before `submit` returns)
//! 2. send the write, bounded by the API timeout
//! 3. on success invalidate the declared keys and drop the undo snapshot;
//!    on failure restore every touched entry and report the error
//!
//! Mutations on the same entity are serialized: a second one is rejected
//! with [`MutationError::Busy`] while the first is pending.

pub mod machines;
pub mod schedule;
pub mod work_orders;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use crate::api::types::WorkOrderId;
use crate::api::{KeyScope, ProductionApi, ProductionCache, QueryData, QueryKey};
use crate::error::{ApiError, MutationError, ValidationError};

/// Restores one cache entry from its optimistic state.
pub type Undo = Box<dyn FnOnce(&QueryData) -> Option<QueryData> + Send>;

/// The logical entity a mutation changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityId {
  WorkOrder(WorkOrderId),
  Machine(String),
  Schedule(String),
  /// Every work center's schedule at once
  AllSchedules,
}

impl EntityId {
  pub fn conflicts_with(&self, other: &EntityId) -> bool {
    match (self, other) {
      (EntityId::AllSchedules, EntityId::Schedule(_) | EntityId::AllSchedules)
      | (EntityId::Schedule(_), EntityId::AllSchedules) => true,
      _ => self == other,
    }
  }
}

impl std::fmt::Display for EntityId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EntityId::WorkOrder(id) => write!(f, "work order {}", id),
      EntityId::Machine(code) => write!(f, "machine {}", code),
      EntityId::Schedule(wc) => write!(f, "schedule {}", wc),
      EntityId::AllSchedules => f.write_str("all schedules"),
    }
  }
}

/// Undo information for every cache entry a mutation touched.
///
/// Each entry keeps its own undo, so rolling back one mutation restores only
/// what that mutation changed even if another mutation patched the same
/// list in the meantime.
#[derive(Default)]
pub struct Snapshot {
  entries: Vec<(QueryKey, Undo)>,
}

impl Snapshot {
  /// Apply `update` to the cached value of `key`. `update` returns the new
  /// value plus its undo; returning `None` (or the key having no data) leaves
  /// the entry alone. Returns whether the entry was changed.
  pub fn patch<U>(
    &mut self,
    cache: &ProductionCache,
    key: &QueryKey,
    update: impl FnOnce(&QueryData) -> Option<(QueryData, U)>,
  ) -> bool
  where
    U: FnOnce(&QueryData) -> Option<QueryData> + Send + 'static,
  {
    match cache.apply_optimistic(key, update) {
      Some(undo) => {
        self.entries.push((key.clone(), Box::new(undo)));
        true
      }
      None => false,
    }
  }

  /// [`patch`](Self::patch) every cached key matching `scope`.
  pub fn patch_matching<U>(
    &mut self,
    cache: &ProductionCache,
    scope: impl Fn(&QueryKey) -> bool,
    update: impl Fn(&QueryData) -> Option<(QueryData, U)>,
  ) -> usize
  where
    U: FnOnce(&QueryData) -> Option<QueryData> + Send + 'static,
  {
    cache
      .keys_matching(scope)
      .iter()
      .filter(|key| self.patch(cache, key, &update))
      .count()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
    self.entries.iter().map(|(key, _)| key)
  }

  fn commit(self, cache: &ProductionCache) {
    for (key, _) in self.entries {
      cache.commit_optimistic(&key);
    }
  }

  fn rollback(self, cache: &ProductionCache) {
    for (key, undo) in self.entries.into_iter().rev() {
      cache.rollback_optimistic(&key, undo);
    }
  }
}

impl std::fmt::Debug for Snapshot {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list().entries(self.keys()).finish()
  }
}

/// One write against the API.
#[async_trait]
pub trait Mutation: Send + Sync + 'static {
  type Output: Send + 'static;

  /// Name used in logs and errors
  fn name(&self) -> &'static str;

  /// Entity to serialize on; `None` never conflicts.
  fn entity(&self) -> Option<EntityId>;

  /// Reject bad input before anything is sent or changed.
  fn validate(&self) -> Result<(), ValidationError> {
    Ok(())
  }

  /// Keys that are stale once the server accepted the write.
  fn invalidates(&self) -> Vec<KeyScope>;

  /// Apply the expected outcome to cached data, recording undo information.
  fn apply_optimistic(
    &self,
    _cache: &ProductionCache,
    _snapshot: &mut Snapshot,
  ) -> Result<(), ValidationError> {
    Ok(())
  }

  async fn execute(&self, api: &dyn ProductionApi) -> Result<Self::Output, ApiError>;
}

type Leases = Arc<Mutex<Vec<EntityId>>>;

fn lock(leases: &Leases) -> MutexGuard<'_, Vec<EntityId>> {
  leases.lock().unwrap_or_else(PoisonError::into_inner)
}

struct EntityLease {
  entity: EntityId,
  leases: Leases,
}

impl Drop for EntityLease {
  fn drop(&mut self) {
    let mut leases = lock(&self.leases);
    if let Some(index) = leases.iter().position(|e| *e == self.entity) {
      leases.swap_remove(index);
    }
  }
}

/// A submitted mutation whose write has not settled yet.
///
/// Dropping it unsettled (e.g. the caller dropped the future) rolls the
/// optimistic state back.
struct PendingMutation {
  id: u64,
  name: &'static str,
  snapshot: Option<Snapshot>,
  cache: ProductionCache,
  _lease: Option<EntityLease>,
}

impl PendingMutation {
  fn commit(mut self, targets: &[KeyScope]) {
    // Invalidate while still held so each touched key refetches exactly once
    // when the hold is released.
    let mut invalidated = 0;
    for scope in targets {
      invalidated += self.cache.invalidate_matching(|key| scope.matches(key));
    }
    if let Some(snapshot) = self.snapshot.take() {
      snapshot.commit(&self.cache);
    }
    info!(mutation = self.name, id = self.id, invalidated, "mutation committed");
  }

  fn rollback(mut self, error: &ApiError) {
    if let Some(snapshot) = self.snapshot.take() {
      warn!(
        mutation = self.name,
        id = self.id,
        entries = snapshot.len(),
        error = %error,
        "mutation failed, rolling back"
      );
      snapshot.rollback(&self.cache);
    }
  }
}

impl Drop for PendingMutation {
  fn drop(&mut self) {
    if let Some(snapshot) = self.snapshot.take() {
      warn!(
        mutation = self.name,
        id = self.id,
        "mutation dropped before settling, rolling back"
      );
      snapshot.rollback(&self.cache);
    }
  }
}

/// Runs mutations: optimistic apply, write, then commit or rollback.
#[derive(Clone)]
pub struct MutationExecutor {
  cache: ProductionCache,
  api: Arc<dyn ProductionApi>,
  timeout: Duration,
  leases: Leases,
  next_id: Arc<AtomicU64>,
}

impl MutationExecutor {
  pub fn new(cache: ProductionCache, api: Arc<dyn ProductionApi>, timeout: Duration) -> Self {
    Self {
      cache,
      api,
      timeout,
      leases: Arc::new(Mutex::new(Vec::new())),
      next_id: Arc::new(AtomicU64::new(1)),
    }
  }

  pub fn cache(&self) -> &ProductionCache {
    &self.cache
  }

  /// Whether a mutation on `entity` is pending; controls that would start
  /// another one should stay disabled meanwhile.
  pub fn is_pending(&self, entity: &EntityId) -> bool {
    lock(&self.leases).iter().any(|e| e.conflicts_with(entity))
  }

  pub fn pending_count(&self) -> usize {
    lock(&self.leases).len()
  }

  /// Submit a mutation.
  ///
  /// Validation, the entity lease and the optimistic update all happen
  /// before this returns, so the new state is visible immediately. The
  /// returned future performs the write and settles the mutation.
  pub fn submit<M: Mutation>(
    &self,
    mutation: M,
  ) -> BoxFuture<'static, Result<M::Output, MutationError>> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let prepared = self.prepare(id, &mutation);
    let api = Arc::clone(&self.api);
    let timeout = self.timeout;

    async move {
      let pending = prepared?;
      let outcome = match tokio::time::timeout(timeout, mutation.execute(api.as_ref())).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ApiError::Timeout {
          endpoint: mutation.name().to_string(),
        }),
      };
      match outcome {
        Ok(output) => {
          pending.commit(&mutation.invalidates());
          Ok(output)
        }
        Err(source) => {
          pending.rollback(&source);
          Err(MutationError::Failed {
            mutation: mutation.name(),
            source,
          })
        }
      }
    }
    .boxed()
  }

  fn prepare<M: Mutation>(&self, id: u64, mutation: &M) -> Result<PendingMutation, MutationError> {
    let name = mutation.name();
    if let Err(e) = mutation.validate() {
      debug!(mutation = name, id, error = %e, "mutation rejected");
      return Err(e.into());
    }

    let lease = match mutation.entity() {
      Some(entity) => Some(self.lease(entity)?),
      None => None,
    };

    let mut snapshot = Snapshot::default();
    if let Err(e) = mutation.apply_optimistic(&self.cache, &mut snapshot) {
      snapshot.rollback(&self.cache);
      debug!(mutation = name, id, error = %e, "mutation rejected");
      return Err(e.into());
    }
    debug!(mutation = name, id, entries = snapshot.len(), "optimistic update applied");

    Ok(PendingMutation {
      id,
      name,
      snapshot: Some(snapshot),
      cache: self.cache.clone(),
      _lease: lease,
    })
  }

  fn lease(&self, entity: EntityId) -> Result<EntityLease, MutationError> {
    let mut leases = lock(&self.leases);
    if leases.iter().any(|held| held.conflicts_with(&entity)) {
      return Err(MutationError::Busy {
        entity: entity.to_string(),
      });
    }
    leases.push(entity.clone());
    Ok(EntityLease {
      entity,
      leases: Arc::clone(&self.leases),
    })
  }
}

impl std::fmt::Debug for MutationExecutor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MutationExecutor")
      .field("timeout", &self.timeout)
      .field("pending", &self.pending_count())
      .finish_non_exhaustive()
  }
}
