//! Scripted in-memory API for tests.
//!
//! Every endpoint counts its calls, can be told to fail, and can be held
//! open until released so tests can observe state while a request is in
//! flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use tokio::sync::Semaphore;

use super::types::{
  check_permutation, OperationId, OptimizationCriteria, OptimizeRequest, OptimizedSchedule,
  PriorityLevel, ReorderAck, Schedule, ScheduleItem, WorkCenter, WorkOrder, WorkOrderDraft,
  WorkOrderFilter, WorkOrderId, WorkOrderPatch, WorkOrderStatus,
};
use super::ProductionApi;
use crate::error::ApiError;

pub mod endpoint {
  pub const WORK_ORDERS: &str = "work_orders";
  pub const WORK_ORDER: &str = "work_order";
  pub const CREATE_WORK_ORDER: &str = "create_work_order";
  pub const UPDATE_WORK_ORDER: &str = "update_work_order";
  pub const SET_WORK_ORDER_STATUS: &str = "set_work_order_status";
  pub const DELETE_WORK_ORDER: &str = "delete_work_order";
  pub const MACHINES: &str = "machines";
  pub const MACHINE: &str = "machine";
  pub const SET_MACHINE_ACTIVE: &str = "set_machine_active";
  pub const MACHINE_CALENDAR: &str = "machine_calendar";
  pub const SCHEDULE: &str = "schedule";
  pub const OPTIMIZE: &str = "optimize";
  pub const REORDER: &str = "reorder";
}

#[derive(Debug, Default)]
pub struct FakeState {
  pub work_orders: Vec<WorkOrder>,
  pub machines: Vec<WorkCenter>,
  pub schedules: HashMap<String, Schedule>,
  /// Every accepted reorder call, in order
  pub reorders: Vec<(String, Vec<OperationId>)>,
  next_id: WorkOrderId,
}

#[derive(Default)]
pub struct FakeApi {
  state: Mutex<FakeState>,
  calls: Mutex<HashMap<&'static str, usize>>,
  failures: Mutex<HashMap<&'static str, ApiError>>,
  gates: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
  latency: Mutex<HashMap<&'static str, Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn work_order(id: WorkOrderId, status: WorkOrderStatus, priority: PriorityLevel) -> WorkOrder {
  WorkOrder {
    id,
    rn: format!("WO-{}", id),
    status,
    priority_level: priority,
    delivery_date: NaiveDate::from_ymd_opt(2024, 6, id as u32),
    assembly_date: None,
    third_date: None,
    product_id: 100 + id,
    product_kpl: format!("KPL-{}", 100 + id),
    product_name: format!("Product {}", id),
    quantity: 10 * id,
    updated_at: Utc
      .with_ymd_and_hms(2024, 5, 1, 8, id as u32, 0)
      .single()
      .unwrap_or_default(),
  }
}

pub fn schedule_item(
  id: OperationId,
  position: usize,
  work_order_id: WorkOrderId,
  operation: &str,
  minutes: f64,
) -> ScheduleItem {
  ScheduleItem {
    id,
    position,
    work_order_id,
    work_order_rn: format!("WO-{}", work_order_id),
    operation: operation.to_string(),
    standard_minutes: Some(minutes),
  }
}

impl FakeApi {
  /// Three work orders, two machines and a schedule for each machine.
  ///
  /// `SAV100` runs operations 101, 102, 103 (WO-1, WO-2, WO-3);
  /// `G1000` runs 201, 202.
  pub fn seeded() -> Self {
    let api = FakeApi::default();
    {
      let mut state = api.state();
      state.work_orders = vec![
        work_order(1, WorkOrderStatus::Pending, PriorityLevel::Medium),
        work_order(2, WorkOrderStatus::InProgress, PriorityLevel::High),
        work_order(3, WorkOrderStatus::Completed, PriorityLevel::Low),
      ];
      state.next_id = 4;
      state.machines = vec![
        WorkCenter {
          code: "SAV100".into(),
          name: "Saw 100".into(),
          is_active: true,
          capacity_hours_per_day: 8.0,
          setup_time_minutes: 15,
          cost_per_hour: Some(42.0),
        },
        WorkCenter {
          code: "G1000".into(),
          name: "Grinder 1000".into(),
          is_active: false,
          capacity_hours_per_day: 16.0,
          setup_time_minutes: 30,
          cost_per_hour: None,
        },
      ];
      state.schedules.insert(
        "SAV100".into(),
        Schedule {
          work_center: "SAV100".into(),
          items: vec![
            schedule_item(101, 0, 1, "Cut", 30.0),
            schedule_item(102, 1, 2, "Drill", 45.0),
            schedule_item(103, 2, 3, "Deburr", 15.0),
          ],
        },
      );
      state.schedules.insert(
        "G1000".into(),
        Schedule {
          work_center: "G1000".into(),
          items: vec![
            schedule_item(201, 0, 2, "Grind", 60.0),
            schedule_item(202, 1, 1, "Polish", 20.0),
          ],
        },
      );
    }
    api
  }

  pub fn state(&self) -> MutexGuard<'_, FakeState> {
    lock(&self.state)
  }

  pub fn calls(&self, endpoint: &'static str) -> usize {
    lock(&self.calls).get(endpoint).copied().unwrap_or(0)
  }

  /// Fail every call to `endpoint` with an HTTP status until [`recover`](Self::recover).
  pub fn fail(&self, endpoint: &'static str, status: u16) {
    self.fail_with(
      endpoint,
      ApiError::Status {
        endpoint: endpoint.to_string(),
        status,
        message: "injected failure".to_string(),
      },
    );
  }

  pub fn fail_with(&self, endpoint: &'static str, error: ApiError) {
    lock(&self.failures).insert(endpoint, error);
  }

  pub fn recover(&self, endpoint: &'static str) {
    lock(&self.failures).remove(endpoint);
  }

  /// Hold calls to `endpoint` open until [`release`](Self::release).
  pub fn hold(&self, endpoint: &'static str) {
    lock(&self.gates).insert(endpoint, Arc::new(Semaphore::new(0)));
  }

  pub fn release(&self, endpoint: &'static str) {
    if let Some(gate) = lock(&self.gates).remove(endpoint) {
      gate.close();
    }
  }

  pub fn set_latency(&self, endpoint: &'static str, latency: Duration) {
    lock(&self.latency).insert(endpoint, latency);
  }

  async fn enter(&self, endpoint: &'static str) -> Result<(), ApiError> {
    *lock(&self.calls).entry(endpoint).or_default() += 1;

    let gate = lock(&self.gates).get(endpoint).cloned();
    if let Some(gate) = gate {
      // Closed on release; the error is the signal to go ahead
      let _ = gate.acquire().await;
    }
    let latency = lock(&self.latency).get(endpoint).copied();
    if let Some(latency) = latency {
      tokio::time::sleep(latency).await;
    }
    match lock(&self.failures).get(endpoint) {
      Some(error) => Err(error.clone()),
      None => Ok(()),
    }
  }
}

fn not_found(endpoint: &str, what: impl std::fmt::Display) -> ApiError {
  ApiError::Status {
    endpoint: endpoint.to_string(),
    status: 404,
    message: format!("{} not found", what),
  }
}

#[async_trait]
impl ProductionApi for FakeApi {
  async fn work_orders(&self, filter: &WorkOrderFilter) -> Result<Vec<WorkOrder>, ApiError> {
    self.enter(endpoint::WORK_ORDERS).await?;
    let state = self.state();
    let on_work_center: Option<Vec<WorkOrderId>> = filter.work_center.as_ref().map(|wc| {
      state
        .schedules
        .get(wc)
        .map(|s| s.items.iter().map(|item| item.work_order_id).collect())
        .unwrap_or_default()
    });
    Ok(
      state
        .work_orders
        .iter()
        .filter(|o| filter.status.map(|s| o.status == s).unwrap_or(true))
        .filter(|o| !filter.urgent_only || o.priority_level.is_urgent())
        .filter(|o| {
          on_work_center
            .as_ref()
            .map(|ids| ids.contains(&o.id))
            .unwrap_or(true)
        })
        .cloned()
        .collect(),
    )
  }

  async fn work_order(&self, id: WorkOrderId) -> Result<WorkOrder, ApiError> {
    self.enter(endpoint::WORK_ORDER).await?;
    self
      .state()
      .work_orders
      .iter()
      .find(|o| o.id == id)
      .cloned()
      .ok_or_else(|| not_found(endpoint::WORK_ORDER, id))
  }

  async fn create_work_order(&self, draft: &WorkOrderDraft) -> Result<WorkOrder, ApiError> {
    self.enter(endpoint::CREATE_WORK_ORDER).await?;
    let mut state = self.state();
    let id = state.next_id.max(1);
    state.next_id = id + 1;
    let order = WorkOrder {
      id,
      rn: draft.rn.clone(),
      status: draft.status,
      priority_level: draft.priority_level,
      delivery_date: draft.delivery_date,
      assembly_date: draft.assembly_date,
      third_date: draft.third_date,
      product_id: draft.product_id,
      product_kpl: format!("KPL-{}", draft.product_id),
      product_name: String::new(),
      quantity: draft.quantity,
      updated_at: Utc::now(),
    };
    state.work_orders.push(order.clone());
    Ok(order)
  }

  async fn update_work_order(
    &self,
    id: WorkOrderId,
    patch: &WorkOrderPatch,
  ) -> Result<WorkOrder, ApiError> {
    self.enter(endpoint::UPDATE_WORK_ORDER).await?;
    let mut state = self.state();
    let order = state
      .work_orders
      .iter_mut()
      .find(|o| o.id == id)
      .ok_or_else(|| not_found(endpoint::UPDATE_WORK_ORDER, id))?;
    patch.apply(order);
    order.updated_at = Utc::now();
    Ok(order.clone())
  }

  async fn set_work_order_status(
    &self,
    id: WorkOrderId,
    status: WorkOrderStatus,
  ) -> Result<Option<WorkOrder>, ApiError> {
    self.enter(endpoint::SET_WORK_ORDER_STATUS).await?;
    let mut state = self.state();
    let order = state
      .work_orders
      .iter_mut()
      .find(|o| o.id == id)
      .ok_or_else(|| not_found(endpoint::SET_WORK_ORDER_STATUS, id))?;
    order.status = status;
    order.updated_at = Utc::now();
    Ok(Some(order.clone()))
  }

  async fn delete_work_order(&self, id: WorkOrderId) -> Result<(), ApiError> {
    self.enter(endpoint::DELETE_WORK_ORDER).await?;
    let mut state = self.state();
    let before = state.work_orders.len();
    state.work_orders.retain(|o| o.id != id);
    if state.work_orders.len() == before {
      return Err(not_found(endpoint::DELETE_WORK_ORDER, id));
    }
    Ok(())
  }

  async fn machines(&self) -> Result<Vec<WorkCenter>, ApiError> {
    self.enter(endpoint::MACHINES).await?;
    Ok(self.state().machines.clone())
  }

  async fn machine(&self, code: &str) -> Result<WorkCenter, ApiError> {
    self.enter(endpoint::MACHINE).await?;
    self
      .state()
      .machines
      .iter()
      .find(|m| m.code == code)
      .cloned()
      .ok_or_else(|| not_found(endpoint::MACHINE, code))
  }

  async fn set_machine_active(
    &self,
    code: &str,
    is_active: bool,
  ) -> Result<Option<WorkCenter>, ApiError> {
    self.enter(endpoint::SET_MACHINE_ACTIVE).await?;
    let mut state = self.state();
    let machine = state
      .machines
      .iter_mut()
      .find(|m| m.code == code)
      .ok_or_else(|| not_found(endpoint::SET_MACHINE_ACTIVE, code))?;
    machine.is_active = is_active;
    // The real backend only acknowledges
    Ok(None)
  }

  async fn machine_calendar(&self, code: &str) -> Result<serde_json::Value, ApiError> {
    self.enter(endpoint::MACHINE_CALENDAR).await?;
    if !self.state().machines.iter().any(|m| m.code == code) {
      return Err(not_found(endpoint::MACHINE_CALENDAR, code));
    }
    Ok(serde_json::json!({
      "work_center": code,
      "shifts": { "shift_1": "07:00-15:00", "shift_2": "15:00-23:00" }
    }))
  }

  async fn schedule(&self, work_center: &str) -> Result<Schedule, ApiError> {
    self.enter(endpoint::SCHEDULE).await?;
    self
      .state()
      .schedules
      .get(work_center)
      .cloned()
      .ok_or_else(|| not_found(endpoint::SCHEDULE, work_center))
  }

  async fn optimize(&self, request: &OptimizeRequest) -> Result<OptimizedSchedule, ApiError> {
    self.enter(endpoint::OPTIMIZE).await?;
    let mut state = self.state();
    let FakeState {
      work_orders,
      schedules,
      ..
    } = &mut *state;
    let targets: Vec<String> = match &request.work_center {
      Some(wc) if !schedules.contains_key(wc) => {
        return Err(not_found(endpoint::OPTIMIZE, wc));
      }
      Some(wc) => vec![wc.clone()],
      None => schedules.keys().cloned().collect(),
    };

    let mut items = Vec::new();
    for wc in targets {
      let Some(schedule) = schedules.get_mut(&wc) else {
        continue;
      };
      let order_of = |item: &ScheduleItem| work_orders.iter().find(|o| o.id == item.work_order_id);
      match request.criteria {
        OptimizationCriteria::Urgency => schedule
          .items
          .sort_by_key(|item| order_of(item).map(|o| o.priority_level)),
        OptimizationCriteria::DeliveryDate => schedule
          .items
          .sort_by_key(|item| order_of(item).and_then(|o| o.delivery_date)),
        _ => schedule.items.reverse(),
      }
      for (position, item) in schedule.items.iter_mut().enumerate() {
        item.position = position;
      }
      items.extend(schedule.items.iter().cloned());
    }
    Ok(OptimizedSchedule {
      work_center: request.work_center.clone(),
      items,
    })
  }

  async fn reorder(
    &self,
    work_center: &str,
    order: &[OperationId],
  ) -> Result<ReorderAck, ApiError> {
    self.enter(endpoint::REORDER).await?;
    let mut state = self.state();
    let schedule = state
      .schedules
      .get(work_center)
      .ok_or_else(|| not_found(endpoint::REORDER, work_center))?;
    check_permutation(&schedule.ids(), order).map_err(|e| ApiError::Status {
      endpoint: endpoint::REORDER.to_string(),
      status: 400,
      message: e.to_string(),
    })?;
    let reordered = schedule.reordered(order)?;
    state.schedules.insert(work_center.to_string(), reordered);
    state.reorders.push((work_center.to_string(), order.to_vec()));
    Ok(ReorderAck {
      work_center: work_center.to_string(),
      sequence: order.to_vec(),
    })
  }
}
