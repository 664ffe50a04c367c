//! Domain types for the production dashboard.
//!
//! Wire shapes live in `api_types`; everything here has already been
//! validated at the decode boundary.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type WorkOrderId = i64;
pub type OperationId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
  Pending,
  InProgress,
  Completed,
}

impl WorkOrderStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      WorkOrderStatus::Pending => "pending",
      WorkOrderStatus::InProgress => "in_progress",
      WorkOrderStatus::Completed => "completed",
    }
  }
}

impl fmt::Display for WorkOrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for WorkOrderStatus {
  type Err = ValidationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
      "pending" => Ok(WorkOrderStatus::Pending),
      "in_progress" => Ok(WorkOrderStatus::InProgress),
      "completed" => Ok(WorkOrderStatus::Completed),
      _ => Err(ValidationError::UnknownStatus(s.to_string())),
    }
  }
}

/// Work order priority; 1 is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriorityLevel {
  High = 1,
  Medium = 2,
  Low = 3,
}

impl PriorityLevel {
  pub fn level(&self) -> i64 {
    *self as i64
  }

  pub fn is_urgent(&self) -> bool {
    *self == PriorityLevel::High
  }
}

impl TryFrom<i64> for PriorityLevel {
  type Error = ValidationError;

  fn try_from(level: i64) -> Result<Self, Self::Error> {
    match level {
      1 => Ok(PriorityLevel::High),
      2 => Ok(PriorityLevel::Medium),
      3 => Ok(PriorityLevel::Low),
      other => Err(ValidationError::PriorityLevel(other)),
    }
  }
}

impl fmt::Display for PriorityLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "P{}", self.level())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkOrder {
  pub id: WorkOrderId,
  /// Work order number as shown to operators (e.g. `WO-1`)
  pub rn: String,
  pub status: WorkOrderStatus,
  pub priority_level: PriorityLevel,
  pub delivery_date: Option<NaiveDate>,
  pub assembly_date: Option<NaiveDate>,
  pub third_date: Option<NaiveDate>,
  pub product_id: i64,
  pub product_kpl: String,
  pub product_name: String,
  pub quantity: i64,
  pub updated_at: DateTime<Utc>,
}

impl WorkOrder {
  /// Case-insensitive match on work order number, product code or name.
  pub fn matches_search(&self, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
      return true;
    }
    [&self.rn, &self.product_kpl, &self.product_name]
      .iter()
      .any(|field| field.to_lowercase().contains(&term))
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkCenter {
  pub code: String,
  pub name: String,
  pub is_active: bool,
  pub capacity_hours_per_day: f64,
  pub setup_time_minutes: i64,
  pub cost_per_hour: Option<f64>,
}

/// One operation queued on a work center.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleItem {
  pub id: OperationId,
  /// 0-based slot in the work center's queue
  pub position: usize,
  pub work_order_id: WorkOrderId,
  pub work_order_rn: String,
  pub operation: String,
  /// Planned duration in minutes
  pub standard_minutes: Option<f64>,
}

/// Ordered operation queue of a single work center.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
  pub work_center: String,
  pub items: Vec<ScheduleItem>,
}

impl Schedule {
  pub fn ids(&self) -> Vec<OperationId> {
    self.items.iter().map(|item| item.id).collect()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn position_of(&self, id: OperationId) -> Option<usize> {
    self.items.iter().position(|item| item.id == id)
  }

  /// Positions are exactly `0..n` in item order.
  pub fn is_dense(&self) -> bool {
    self
      .items
      .iter()
      .enumerate()
      .all(|(index, item)| item.position == index)
  }

  /// The same items in `order`, with positions reassigned to their index.
  ///
  /// `order` must be a permutation of the current ids.
  pub fn reordered(&self, order: &[OperationId]) -> Result<Schedule, ValidationError> {
    check_permutation(&self.ids(), order)?;
    let items = order
      .iter()
      .enumerate()
      .filter_map(|(position, id)| {
        self
          .items
          .iter()
          .find(|item| item.id == *id)
          .map(|item| ScheduleItem {
            position,
            ..item.clone()
          })
      })
      .collect();
    Ok(Schedule {
      work_center: self.work_center.clone(),
      items,
    })
  }

  /// Sum of planned minutes across all operations with a known duration.
  pub fn planned_minutes(&self) -> f64 {
    self.items.iter().filter_map(|item| item.standard_minutes).sum()
  }
}

/// Ensure `next` holds exactly the ids of `previous`, each once.
pub fn check_permutation(
  previous: &[OperationId],
  next: &[OperationId],
) -> Result<(), ValidationError> {
  let mut seen = HashSet::with_capacity(next.len());
  for id in next {
    if !seen.insert(*id) {
      return Err(ValidationError::DuplicateOperation(*id));
    }
  }
  let before: HashSet<_> = previous.iter().copied().collect();
  if previous.len() != next.len() || before != seen {
    return Err(ValidationError::ReorderMembership(format!(
      "expected {:?}, got {:?}",
      previous, next
    )));
  }
  Ok(())
}

/// Server-side filter for the work order list.
///
/// Each distinct filter is cached separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct WorkOrderFilter {
  pub work_center: Option<String>,
  pub status: Option<WorkOrderStatus>,
  pub urgent_only: bool,
}

impl WorkOrderFilter {
  pub fn with_work_center(mut self, work_center: impl Into<String>) -> Self {
    self.work_center = Some(work_center.into());
    self
  }

  pub fn with_status(mut self, status: WorkOrderStatus) -> Self {
    self.status = Some(status);
    self
  }

  pub fn urgent(mut self) -> Self {
    self.urgent_only = true;
    self
  }

  pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(wc) = &self.work_center {
      pairs.push(("work_center", wc.clone()));
    }
    if let Some(status) = self.status {
      pairs.push(("status", status.to_string()));
    }
    if self.urgent_only {
      pairs.push(("urgent_only", "true".to_string()));
    }
    pairs
  }
}

impl fmt::Display for WorkOrderFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let pairs = self.query_pairs();
    if pairs.is_empty() {
      return f.write_str("all");
    }
    let parts: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    f.write_str(&parts.join(","))
  }
}

/// Input for creating a work order.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkOrderDraft {
  pub rn: String,
  pub product_id: i64,
  pub quantity: i64,
  pub priority_level: PriorityLevel,
  pub delivery_date: Option<NaiveDate>,
  pub assembly_date: Option<NaiveDate>,
  pub third_date: Option<NaiveDate>,
  pub status: WorkOrderStatus,
}

impl WorkOrderDraft {
  pub fn new(rn: impl Into<String>, product_id: i64, quantity: i64) -> Self {
    Self {
      rn: rn.into(),
      product_id,
      quantity,
      priority_level: PriorityLevel::Medium,
      delivery_date: None,
      assembly_date: None,
      third_date: None,
      status: WorkOrderStatus::Pending,
    }
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.rn.trim().is_empty() {
      return Err(ValidationError::Empty { field: "rn" });
    }
    positive("product_id", self.product_id)?;
    positive("quantity", self.quantity)
  }
}

/// Partial update of a work order; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkOrderPatch {
  pub quantity: Option<i64>,
  pub priority_level: Option<PriorityLevel>,
  pub delivery_date: Option<NaiveDate>,
  pub assembly_date: Option<NaiveDate>,
  pub third_date: Option<NaiveDate>,
  pub status: Option<WorkOrderStatus>,
}

impl WorkOrderPatch {
  pub fn is_empty(&self) -> bool {
    *self == WorkOrderPatch::default()
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.is_empty() {
      return Err(ValidationError::Empty { field: "patch" });
    }
    match self.quantity {
      Some(quantity) => positive("quantity", quantity),
      None => Ok(()),
    }
  }

  pub fn apply(&self, order: &mut WorkOrder) {
    if let Some(quantity) = self.quantity {
      order.quantity = quantity;
    }
    if let Some(priority) = self.priority_level {
      order.priority_level = priority;
    }
    if let Some(date) = self.delivery_date {
      order.delivery_date = Some(date);
    }
    if let Some(date) = self.assembly_date {
      order.assembly_date = Some(date);
    }
    if let Some(date) = self.third_date {
      order.third_date = Some(date);
    }
    if let Some(status) = self.status {
      order.status = status;
    }
  }
}

fn positive(field: &'static str, value: i64) -> Result<(), ValidationError> {
  if value > 0 {
    Ok(())
  } else {
    Err(ValidationError::NotPositive { field, value })
  }
}

/// Ordering rule the server applies when optimizing a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizationCriteria {
  /// Earliest delivery date first
  #[serde(rename = "datum_isporuke")]
  DeliveryDate,
  /// Earliest assembly date first
  #[serde(rename = "datum_sastavljanja")]
  AssemblyDate,
  #[serde(rename = "datum_treci")]
  ThirdDate,
  /// Urgent work orders first
  #[serde(rename = "hitno")]
  Urgency,
  #[serde(rename = "custom")]
  Custom,
}

impl OptimizationCriteria {
  pub fn as_str(&self) -> &'static str {
    match self {
      OptimizationCriteria::DeliveryDate => "datum_isporuke",
      OptimizationCriteria::AssemblyDate => "datum_sastavljanja",
      OptimizationCriteria::ThirdDate => "datum_treci",
      OptimizationCriteria::Urgency => "hitno",
      OptimizationCriteria::Custom => "custom",
    }
  }
}

impl fmt::Display for OptimizationCriteria {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OptimizationCriteria {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "datum_isporuke" | "delivery" => Ok(OptimizationCriteria::DeliveryDate),
      "datum_sastavljanja" | "assembly" => Ok(OptimizationCriteria::AssemblyDate),
      "datum_treci" | "third" => Ok(OptimizationCriteria::ThirdDate),
      "hitno" | "priority" | "urgency" => Ok(OptimizationCriteria::Urgency),
      "custom" => Ok(OptimizationCriteria::Custom),
      other => Err(format!("unknown optimization criteria `{}`", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeRequest {
  pub criteria: OptimizationCriteria,
  /// `None` optimizes every work center
  pub work_center: Option<String>,
}

/// Server-computed order returned by an optimize call.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedSchedule {
  pub work_center: Option<String>,
  pub items: Vec<ScheduleItem>,
}

/// Server confirmation of a reorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderAck {
  pub work_center: String,
  pub sequence: Vec<OperationId>,
}
