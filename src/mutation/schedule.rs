//! Schedule reordering and optimization.
//!
//! A drag ends with a [`DropOutcome`]. The engine turns it into a new
//! operation order, shows that order at once and sends it to the server;
//! on failure the schedule snaps back to exactly what it was before.

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};

use super::{EntityId, Mutation, MutationExecutor, Snapshot};
use crate::api::types::{
  check_permutation, OperationId, OptimizationCriteria, OptimizeRequest, OptimizedSchedule,
  ReorderAck,
};
use crate::api::{KeyScope, ProductionApi, ProductionCache, QueryData, QueryKey};
use crate::error::{ApiError, MutationError, ValidationError};

/// Result of a drag gesture: the dragged operation and the one it was
/// dropped on, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropOutcome {
  pub active: OperationId,
  pub over: Option<OperationId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderOutcome {
  /// Nothing moved; no request was sent
  Unchanged,
  Reordered(ReorderAck),
}

fn check_work_center(work_center: &str) -> Result<(), ValidationError> {
  if work_center.trim().is_empty() {
    return Err(ValidationError::Empty { field: "work_center" });
  }
  Ok(())
}

/// Replace a work center's operation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderSchedule {
  pub work_center: String,
  pub previous: Vec<OperationId>,
  pub next: Vec<OperationId>,
}

#[async_trait]
impl Mutation for ReorderSchedule {
  type Output = ReorderAck;

  fn name(&self) -> &'static str {
    "reorder_schedule"
  }

  fn entity(&self) -> Option<EntityId> {
    Some(EntityId::Schedule(self.work_center.clone()))
  }

  fn validate(&self) -> Result<(), ValidationError> {
    check_work_center(&self.work_center)?;
    check_permutation(&self.previous, &self.next)
  }

  fn invalidates(&self) -> Vec<KeyScope> {
    vec![KeyScope::Schedule(self.work_center.clone())]
  }

  fn apply_optimistic(
    &self,
    cache: &ProductionCache,
    snapshot: &mut Snapshot,
  ) -> Result<(), ValidationError> {
    let key = QueryKey::Schedule(self.work_center.clone());
    let cached = cache
      .peek(&key)
      .and_then(|s| s.data().and_then(QueryData::as_schedule).map(|s| s.ids()));
    // A refresh may have landed since the drag started; the order we send
    // must still cover exactly what is shown.
    if let Some(ids) = cached {
      check_permutation(&ids, &self.next)?;
    }

    snapshot.patch(cache, &key, |data| {
      let previous = data.as_schedule()?.clone();
      let next = previous.reordered(&self.next).ok()?;
      Some((QueryData::Schedule(next), move |_: &QueryData| {
        Some(QueryData::Schedule(previous))
      }))
    });
    Ok(())
  }

  async fn execute(&self, api: &dyn ProductionApi) -> Result<ReorderAck, ApiError> {
    api.reorder(&self.work_center, &self.next).await
  }
}

/// Ask the server to re-sequence one work center, or all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeSchedule {
  pub criteria: OptimizationCriteria,
  pub work_center: Option<String>,
}

#[async_trait]
impl Mutation for OptimizeSchedule {
  type Output = OptimizedSchedule;

  fn name(&self) -> &'static str {
    "optimize_schedule"
  }

  fn entity(&self) -> Option<EntityId> {
    Some(match &self.work_center {
      Some(wc) => EntityId::Schedule(wc.clone()),
      None => EntityId::AllSchedules,
    })
  }

  fn validate(&self) -> Result<(), ValidationError> {
    match &self.work_center {
      Some(wc) => check_work_center(wc),
      None => Ok(()),
    }
  }

  fn invalidates(&self) -> Vec<KeyScope> {
    match &self.work_center {
      Some(wc) => vec![KeyScope::Schedule(wc.clone())],
      None => vec![KeyScope::Schedules],
    }
  }

  async fn execute(&self, api: &dyn ProductionApi) -> Result<OptimizedSchedule, ApiError> {
    api
      .optimize(&OptimizeRequest {
        criteria: self.criteria,
        work_center: self.work_center.clone(),
      })
      .await
  }
}

/// Turns drag gestures into reorder mutations.
#[derive(Debug, Clone)]
pub struct ScheduleReorderEngine {
  executor: MutationExecutor,
}

impl ScheduleReorderEngine {
  pub fn new(executor: MutationExecutor) -> Self {
    Self { executor }
  }

  /// New order after dropping `active` onto `over`, or `None` when the drop
  /// changes nothing.
  ///
  /// The dragged operation takes the target's index and everything in
  /// between shifts by one.
  pub fn plan(current: &[OperationId], drop: &DropOutcome) -> Option<Vec<OperationId>> {
    let over = drop.over?;
    if over == drop.active {
      return None;
    }
    let from = current.iter().position(|id| *id == drop.active)?;
    let to = current.iter().position(|id| *id == over)?;
    let mut next = current.to_vec();
    let moved = next.remove(from);
    next.insert(to, moved);
    Some(next)
  }

  /// Send `next` as the new order unless it equals `previous`.
  pub fn reorder(
    &self,
    work_center: &str,
    previous: Vec<OperationId>,
    next: Vec<OperationId>,
  ) -> BoxFuture<'static, Result<ReorderOutcome, MutationError>> {
    if previous == next {
      return future::ready(Ok(ReorderOutcome::Unchanged)).boxed();
    }
    self
      .executor
      .submit(ReorderSchedule {
        work_center: work_center.to_string(),
        previous,
        next,
      })
      .map(|result| result.map(ReorderOutcome::Reordered))
      .boxed()
  }

  /// Apply a drag result to the cached schedule of `work_center`.
  pub fn handle_drop(
    &self,
    work_center: &str,
    drop: DropOutcome,
  ) -> BoxFuture<'static, Result<ReorderOutcome, MutationError>> {
    let key = QueryKey::Schedule(work_center.to_string());
    let current = self
      .executor
      .cache()
      .peek(&key)
      .and_then(|s| s.data().and_then(QueryData::as_schedule).map(|s| s.ids()));
    let Some(current) = current else {
      let err = ValidationError::ScheduleNotLoaded {
        work_center: work_center.to_string(),
      };
      return future::ready(Err(err.into())).boxed();
    };
    match Self::plan(&current, &drop) {
      Some(next) => self.reorder(work_center, current, next),
      None => future::ready(Ok(ReorderOutcome::Unchanged)).boxed(),
    }
  }

  pub fn optimize(
    &self,
    criteria: OptimizationCriteria,
    work_center: Option<String>,
  ) -> BoxFuture<'static, Result<OptimizedSchedule, MutationError>> {
    self.executor.submit(OptimizeSchedule {
      criteria,
      work_center,
    })
  }

  pub fn is_pending(&self, work_center: &str) -> bool {
    self
      .executor
      .is_pending(&EntityId::Schedule(work_center.to_string()))
  }
}
