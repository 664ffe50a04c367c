//! Work order writes.

use async_trait::async_trait;

use super::{EntityId, Mutation, Snapshot};
use crate::api::types::{WorkOrder, WorkOrderDraft, WorkOrderId, WorkOrderPatch, WorkOrderStatus};
use crate::api::{KeyScope, ProductionApi, ProductionCache, QueryData, QueryKey};
use crate::error::{ApiError, ValidationError};

fn is_list(key: &QueryKey) -> bool {
  matches!(key, QueryKey::WorkOrders(_))
}

fn check_id(id: WorkOrderId) -> Result<(), ValidationError> {
  if id <= 0 {
    return Err(ValidationError::NotPositive {
      field: "work_order_id",
      value: id,
    });
  }
  Ok(())
}

/// Replace work order `id` with `edit(order)` in every cached list and in its
/// detail entry.
fn edit_everywhere(
  cache: &ProductionCache,
  snapshot: &mut Snapshot,
  id: WorkOrderId,
  edit: impl Fn(&WorkOrder) -> WorkOrder,
) {
  snapshot.patch_matching(cache, is_list, |data| {
    let orders = data.as_work_orders()?;
    let index = orders.iter().position(|o| o.id == id)?;
    let previous = orders[index].clone();
    let mut next = orders.clone();
    next[index] = edit(&previous);
    Some((QueryData::WorkOrders(next), move |data: &QueryData| {
      let mut orders = data.as_work_orders()?.clone();
      let slot = orders.iter_mut().find(|o| o.id == previous.id)?;
      *slot = previous;
      Some(QueryData::WorkOrders(orders))
    }))
  });

  snapshot.patch(cache, &QueryKey::WorkOrder(id), |data| {
    let previous = data.as_work_order()?.clone();
    let next = edit(&previous);
    Some((QueryData::WorkOrder(next), move |_: &QueryData| {
      Some(QueryData::WorkOrder(previous))
    }))
  });
}

/// Move a work order to another status.
#[derive(Debug, Clone, PartialEq)]
pub struct SetWorkOrderStatus {
  pub id: WorkOrderId,
  pub status: WorkOrderStatus,
}

#[async_trait]
impl Mutation for SetWorkOrderStatus {
  type Output = Option<WorkOrder>;

  fn name(&self) -> &'static str {
    "update_work_order_status"
  }

  fn entity(&self) -> Option<EntityId> {
    Some(EntityId::WorkOrder(self.id))
  }

  fn validate(&self) -> Result<(), ValidationError> {
    check_id(self.id)
  }

  fn invalidates(&self) -> Vec<KeyScope> {
    vec![KeyScope::WorkOrderLists, KeyScope::WorkOrder(self.id)]
  }

  fn apply_optimistic(
    &self,
    cache: &ProductionCache,
    snapshot: &mut Snapshot,
  ) -> Result<(), ValidationError> {
    let status = self.status;
    edit_everywhere(cache, snapshot, self.id, |order| WorkOrder {
      status,
      ..order.clone()
    });
    Ok(())
  }

  async fn execute(&self, api: &dyn ProductionApi) -> Result<Option<WorkOrder>, ApiError> {
    api.set_work_order_status(self.id, self.status).await
  }
}

/// Edit fields of a work order.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateWorkOrder {
  pub id: WorkOrderId,
  pub patch: WorkOrderPatch,
}

#[async_trait]
impl Mutation for UpdateWorkOrder {
  type Output = WorkOrder;

  fn name(&self) -> &'static str {
    "update_work_order"
  }

  fn entity(&self) -> Option<EntityId> {
    Some(EntityId::WorkOrder(self.id))
  }

  fn validate(&self) -> Result<(), ValidationError> {
    check_id(self.id)?;
    self.patch.validate()
  }

  fn invalidates(&self) -> Vec<KeyScope> {
    vec![KeyScope::WorkOrderLists, KeyScope::WorkOrder(self.id)]
  }

  fn apply_optimistic(
    &self,
    cache: &ProductionCache,
    snapshot: &mut Snapshot,
  ) -> Result<(), ValidationError> {
    edit_everywhere(cache, snapshot, self.id, |order| {
      let mut next = order.clone();
      self.patch.apply(&mut next);
      next
    });
    Ok(())
  }

  async fn execute(&self, api: &dyn ProductionApi) -> Result<WorkOrder, ApiError> {
    api.update_work_order(self.id, &self.patch).await
  }
}

/// Remove a work order.
///
/// It disappears from cached lists at once; a failed delete puts it back at
/// its old position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteWorkOrder {
  pub id: WorkOrderId,
}

#[async_trait]
impl Mutation for DeleteWorkOrder {
  type Output = ();

  fn name(&self) -> &'static str {
    "delete_work_order"
  }

  fn entity(&self) -> Option<EntityId> {
    Some(EntityId::WorkOrder(self.id))
  }

  fn validate(&self) -> Result<(), ValidationError> {
    check_id(self.id)
  }

  fn invalidates(&self) -> Vec<KeyScope> {
    vec![KeyScope::WorkOrderLists]
  }

  fn apply_optimistic(
    &self,
    cache: &ProductionCache,
    snapshot: &mut Snapshot,
  ) -> Result<(), ValidationError> {
    let id = self.id;
    snapshot.patch_matching(cache, is_list, |data| {
      let orders = data.as_work_orders()?;
      let index = orders.iter().position(|o| o.id == id)?;
      let mut next = orders.clone();
      let removed = next.remove(index);
      Some((QueryData::WorkOrders(next), move |data: &QueryData| {
        let mut orders = data.as_work_orders()?.clone();
        if orders.iter().any(|o| o.id == removed.id) {
          return None;
        }
        orders.insert(index.min(orders.len()), removed);
        Some(QueryData::WorkOrders(orders))
      }))
    });
    Ok(())
  }

  async fn execute(&self, api: &dyn ProductionApi) -> Result<(), ApiError> {
    api.delete_work_order(self.id).await
  }
}

/// Create a work order. Not optimistic: the id is assigned by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateWorkOrder {
  pub draft: WorkOrderDraft,
}

#[async_trait]
impl Mutation for CreateWorkOrder {
  type Output = WorkOrder;

  fn name(&self) -> &'static str {
    "create_work_order"
  }

  fn entity(&self) -> Option<EntityId> {
    None
  }

  fn validate(&self) -> Result<(), ValidationError> {
    self.draft.validate()
  }

  fn invalidates(&self) -> Vec<KeyScope> {
    vec![KeyScope::WorkOrderLists]
  }

  async fn execute(&self, api: &dyn ProductionApi) -> Result<WorkOrder, ApiError> {
    api.create_work_order(&self.draft).await
  }
}
