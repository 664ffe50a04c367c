//! Cache keys and values for production data.

use std::fmt;

use super::types::{Schedule, WorkCenter, WorkOrder, WorkOrderFilter, WorkOrderId};
use crate::cache::{CacheKey, QueryCache};

/// Cache of every server read the dashboard makes.
pub type ProductionCache = QueryCache<QueryKey, QueryData>;

/// One logical read plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
  WorkOrders(WorkOrderFilter),
  WorkOrder(WorkOrderId),
  Machines,
  Machine(String),
  MachineCalendar(String),
  Schedule(String),
}

impl QueryKey {
  pub fn work_center(&self) -> Option<&str> {
    match self {
      QueryKey::Machine(code) | QueryKey::MachineCalendar(code) | QueryKey::Schedule(code) => {
        Some(code)
      }
      QueryKey::WorkOrders(filter) => filter.work_center.as_deref(),
      _ => None,
    }
  }
}

impl CacheKey for QueryKey {
  fn description(&self) -> String {
    match self {
      QueryKey::WorkOrders(filter) => format!("work-orders[{}]", filter),
      QueryKey::WorkOrder(id) => format!("work-order/{}", id),
      QueryKey::Machines => "machines".to_string(),
      QueryKey::Machine(code) => format!("machine/{}", code),
      QueryKey::MachineCalendar(code) => format!("machine-calendar/{}", code),
      QueryKey::Schedule(wc) => format!("schedule/{}", wc),
    }
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.description())
  }
}

/// Cached payload; the variant always matches the key that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
  WorkOrders(Vec<WorkOrder>),
  WorkOrder(WorkOrder),
  Machines(Vec<WorkCenter>),
  Machine(WorkCenter),
  Calendar(serde_json::Value),
  Schedule(Schedule),
}

impl QueryData {
  pub fn as_work_orders(&self) -> Option<&Vec<WorkOrder>> {
    match self {
      QueryData::WorkOrders(orders) => Some(orders),
      _ => None,
    }
  }

  pub fn as_work_order(&self) -> Option<&WorkOrder> {
    match self {
      QueryData::WorkOrder(order) => Some(order),
      _ => None,
    }
  }

  pub fn as_machines(&self) -> Option<&Vec<WorkCenter>> {
    match self {
      QueryData::Machines(machines) => Some(machines),
      _ => None,
    }
  }

  pub fn as_machine(&self) -> Option<&WorkCenter> {
    match self {
      QueryData::Machine(machine) => Some(machine),
      _ => None,
    }
  }

  pub fn as_calendar(&self) -> Option<&serde_json::Value> {
    match self {
      QueryData::Calendar(calendar) => Some(calendar),
      _ => None,
    }
  }

  pub fn as_schedule(&self) -> Option<&Schedule> {
    match self {
      QueryData::Schedule(schedule) => Some(schedule),
      _ => None,
    }
  }
}

/// A set of cache keys a mutation invalidates on success.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyScope {
  /// Every work order list, whatever its filter
  WorkOrderLists,
  WorkOrder(WorkOrderId),
  Machines,
  Machine(String),
  Schedule(String),
  /// Every work center's schedule
  Schedules,
}

impl KeyScope {
  pub fn matches(&self, key: &QueryKey) -> bool {
    match (self, key) {
      (KeyScope::WorkOrderLists, QueryKey::WorkOrders(_)) => true,
      (KeyScope::WorkOrder(id), QueryKey::WorkOrder(other)) => id == other,
      (KeyScope::Machines, QueryKey::Machines) => true,
      (KeyScope::Machine(code), QueryKey::Machine(other)) => code == other,
      (KeyScope::Schedule(wc), QueryKey::Schedule(other)) => wc == other,
      (KeyScope::Schedules, QueryKey::Schedule(_)) => true,
      _ => false,
    }
  }
}
