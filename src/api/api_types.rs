//! Serde types matching the production API's JSON.
//!
//! These are separate from the domain types so deserialization can stay
//! lenient about shape while the conversion into domain types is strict:
//! anything that does not fit the domain model becomes a
//! [`ValidationError`] instead of reaching the cache.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{
  check_permutation, OperationId, OptimizeRequest, OptimizedSchedule, PriorityLevel, ReorderAck,
  Schedule, ScheduleItem, WorkCenter, WorkOrder, WorkOrderDraft, WorkOrderPatch, WorkOrderStatus,
};
use crate::error::ValidationError;

/// Parse a server timestamp, with or without an offset (naive values are UTC).
pub fn parse_timestamp(endpoint: &str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
  if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
    return Ok(parsed.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
    .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
    .map(|naive| naive.and_utc())
    .map_err(|e| ValidationError::malformed(endpoint, format!("bad timestamp `{}`: {}", value, e)))
}

// ============================================================================
// Work orders
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiWorkOrder {
  pub id: i64,
  #[serde(default)]
  pub rn: String,
  pub status: String,
  pub priority_level: i64,
  pub datum_isporuke: Option<NaiveDate>,
  pub datum_sastavljanja: Option<NaiveDate>,
  pub datum_treci: Option<NaiveDate>,
  #[serde(default)]
  pub product_id: i64,
  #[serde(default)]
  pub product_kpl: Option<String>,
  #[serde(default)]
  pub product_name: Option<String>,
  pub quantity: i64,
  pub updated_at: String,
}

impl ApiWorkOrder {
  pub fn into_domain(self, endpoint: &str) -> Result<WorkOrder, ValidationError> {
    if self.rn.trim().is_empty() {
      return Err(ValidationError::malformed(
        endpoint,
        format!("work order {} has no rn", self.id),
      ));
    }
    let status: WorkOrderStatus = self
      .status
      .parse()
      .map_err(|e| ValidationError::malformed(endpoint, e))?;
    let priority_level = PriorityLevel::try_from(self.priority_level)
      .map_err(|e| ValidationError::malformed(endpoint, e))?;
    Ok(WorkOrder {
      id: self.id,
      rn: self.rn,
      status,
      priority_level,
      delivery_date: self.datum_isporuke,
      assembly_date: self.datum_sastavljanja,
      third_date: self.datum_treci,
      product_id: self.product_id,
      product_kpl: self.product_kpl.unwrap_or_default(),
      product_name: self.product_name.unwrap_or_default(),
      quantity: self.quantity,
      updated_at: parse_timestamp(endpoint, &self.updated_at)?,
    })
  }
}

/// The list endpoint answers with an envelope; older deployments return a
/// bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiWorkOrderList {
  Envelope { work_orders: Vec<ApiWorkOrder> },
  Bare(Vec<ApiWorkOrder>),
}

impl ApiWorkOrderList {
  pub fn into_domain(self, endpoint: &str) -> Result<Vec<WorkOrder>, ValidationError> {
    let orders = match self {
      ApiWorkOrderList::Envelope { work_orders } => work_orders,
      ApiWorkOrderList::Bare(orders) => orders,
    };
    orders.into_iter().map(|o| o.into_domain(endpoint)).collect()
  }
}

/// Bare acknowledgement some write endpoints send instead of the record.
///
/// Only the acknowledgement fields are accepted, so a record that fails to
/// decode is reported as malformed rather than read as an ack.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiAck {
  pub message: String,
  #[serde(default)]
  pub work_order_id: Option<i64>,
  #[serde(default)]
  pub work_center: Option<String>,
  #[serde(default)]
  pub is_active: Option<bool>,
}

/// Either the updated record or an acknowledgement.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiRecordOrAck<T> {
  Record(T),
  Ack(ApiAck),
}

#[derive(Debug, Serialize)]
pub struct ApiWorkOrderCreate<'a> {
  pub rn: &'a str,
  pub product_id: i64,
  pub quantity: i64,
  pub priority_level: i64,
  pub datum_isporuke: Option<NaiveDate>,
  pub datum_sastavljanja: Option<NaiveDate>,
  pub datum_treci: Option<NaiveDate>,
  pub status: WorkOrderStatus,
}

impl<'a> From<&'a WorkOrderDraft> for ApiWorkOrderCreate<'a> {
  fn from(draft: &'a WorkOrderDraft) -> Self {
    Self {
      rn: &draft.rn,
      product_id: draft.product_id,
      quantity: draft.quantity,
      priority_level: draft.priority_level.level(),
      datum_isporuke: draft.delivery_date,
      datum_sastavljanja: draft.assembly_date,
      datum_treci: draft.third_date,
      status: draft.status,
    }
  }
}

/// Only set fields are sent so the server leaves the rest alone.
#[derive(Debug, Serialize)]
pub struct ApiWorkOrderUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub quantity: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority_level: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub datum_isporuke: Option<NaiveDate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub datum_sastavljanja: Option<NaiveDate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub datum_treci: Option<NaiveDate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<WorkOrderStatus>,
}

impl From<&WorkOrderPatch> for ApiWorkOrderUpdate {
  fn from(patch: &WorkOrderPatch) -> Self {
    Self {
      quantity: patch.quantity,
      priority_level: patch.priority_level.map(|p| p.level()),
      datum_isporuke: patch.delivery_date,
      datum_sastavljanja: patch.assembly_date,
      datum_treci: patch.third_date,
      status: patch.status,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ApiStatusUpdate {
  pub status: WorkOrderStatus,
}

// ============================================================================
// Machines
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiWorkCenter {
  pub code: String,
  #[serde(default)]
  pub name: String,
  #[serde(default = "default_active")]
  pub is_active: bool,
  #[serde(default = "default_capacity")]
  pub capacity_hours_per_day: f64,
  #[serde(default)]
  pub setup_time_minutes: i64,
  pub cost_per_hour: Option<f64>,
}

fn default_active() -> bool {
  true
}

fn default_capacity() -> f64 {
  8.0
}

impl ApiWorkCenter {
  pub fn into_domain(self, endpoint: &str) -> Result<WorkCenter, ValidationError> {
    if self.code.trim().is_empty() {
      return Err(ValidationError::malformed(endpoint, "work center without code"));
    }
    if !self.capacity_hours_per_day.is_finite() || self.capacity_hours_per_day < 0.0 {
      return Err(ValidationError::malformed(
        endpoint,
        format!(
          "{} has invalid capacity {}",
          self.code, self.capacity_hours_per_day
        ),
      ));
    }
    Ok(WorkCenter {
      code: self.code,
      name: self.name,
      is_active: self.is_active,
      capacity_hours_per_day: self.capacity_hours_per_day,
      setup_time_minutes: self.setup_time_minutes,
      cost_per_hour: self.cost_per_hour,
    })
  }
}

#[derive(Debug, Serialize)]
pub struct ApiMachineStatusUpdate {
  pub status: &'static str,
  pub is_active: bool,
}

impl ApiMachineStatusUpdate {
  pub fn new(is_active: bool) -> Self {
    Self {
      status: if is_active { "active" } else { "inactive" },
      is_active,
    }
  }
}

// ============================================================================
// Scheduling
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiScheduleEntry {
  pub operation_id: i64,
  pub work_order_id: i64,
  #[serde(default)]
  pub work_order_rn: String,
  #[serde(default)]
  pub naziv: String,
  pub norma: Option<f64>,
  pub sequence_order: i64,
}

/// Sort by `sequence_order` and assign dense positions; duplicate operations
/// are rejected.
pub fn entries_into_items(
  endpoint: &str,
  mut entries: Vec<ApiScheduleEntry>,
) -> Result<Vec<ScheduleItem>, ValidationError> {
  entries.sort_by_key(|e| e.sequence_order);
  let mut seen = std::collections::HashSet::with_capacity(entries.len());
  entries
    .into_iter()
    .enumerate()
    .map(|(position, entry)| {
      if !seen.insert(entry.operation_id) {
        return Err(ValidationError::malformed(
          endpoint,
          ValidationError::DuplicateOperation(entry.operation_id),
        ));
      }
      Ok(ScheduleItem {
        id: entry.operation_id,
        position,
        work_order_id: entry.work_order_id,
        work_order_rn: entry.work_order_rn,
        operation: entry.naziv,
        standard_minutes: entry.norma,
      })
    })
    .collect()
}

#[derive(Debug, Deserialize)]
pub struct ApiScheduleResponse {
  #[serde(alias = "operations", default)]
  pub schedule: Vec<ApiScheduleEntry>,
}

impl ApiScheduleResponse {
  pub fn into_domain(self, endpoint: &str, work_center: &str) -> Result<Schedule, ValidationError> {
    Ok(Schedule {
      work_center: work_center.to_string(),
      items: entries_into_items(endpoint, self.schedule)?,
    })
  }
}

#[derive(Debug, Serialize)]
pub struct ApiOptimizeRequest<'a> {
  pub criteria: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub work_center: Option<&'a str>,
}

impl<'a> From<&'a OptimizeRequest> for ApiOptimizeRequest<'a> {
  fn from(request: &'a OptimizeRequest) -> Self {
    Self {
      criteria: request.criteria.as_str(),
      work_center: request.work_center.as_deref(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiOptimizeResponse {
  #[serde(alias = "schedule", alias = "operations", default)]
  pub optimized_schedule: Vec<ApiScheduleEntry>,
}

impl ApiOptimizeResponse {
  pub fn into_domain(
    self,
    endpoint: &str,
    work_center: Option<&str>,
  ) -> Result<OptimizedSchedule, ValidationError> {
    Ok(OptimizedSchedule {
      work_center: work_center.map(str::to_string),
      items: entries_into_items(endpoint, self.optimized_schedule)?,
    })
  }
}

#[derive(Debug, Serialize)]
pub struct ApiReorderRequest<'a> {
  pub work_center: &'a str,
  pub new_order: &'a [OperationId],
}

/// Reorder answers with the accepted sequence, a full schedule, or neither.
#[derive(Debug, Deserialize)]
pub struct ApiReorderResponse {
  #[serde(default)]
  pub work_center: Option<String>,
  #[serde(alias = "new_order", default)]
  pub new_sequence: Option<Vec<OperationId>>,
  #[serde(alias = "operations", default)]
  pub schedule: Option<Vec<ApiScheduleEntry>>,
}

impl ApiReorderResponse {
  pub fn into_domain(
    self,
    endpoint: &str,
    work_center: &str,
    requested: &[OperationId],
  ) -> Result<ReorderAck, ValidationError> {
    let sequence = match (self.new_sequence, self.schedule) {
      (Some(sequence), _) => sequence,
      (None, Some(entries)) => entries_into_items(endpoint, entries)?
        .into_iter()
        .map(|item| item.id)
        .collect(),
      (None, None) => requested.to_vec(),
    };
    check_permutation(requested, &sequence)
      .map_err(|e| ValidationError::malformed(endpoint, format!("reorder ack: {}", e)))?;
    Ok(ReorderAck {
      work_center: self.work_center.unwrap_or_else(|| work_center.to_string()),
      sequence,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn work_order_json(id: i64, status: &str, priority: i64) -> serde_json::Value {
    json!({
      "id": id,
      "rn": format!("WO-{}", id),
      "status": status,
      "priority_level": priority,
      "datum_isporuke": "2024-03-01",
      "datum_sastavljanja": null,
      "datum_treci": null,
      "product_id": 4,
      "product_kpl": "KPL-4",
      "product_name": "Gear",
      "quantity": 10,
      "created_at": "2024-01-01T08:00:00",
      "updated_at": "2024-02-01T09:30:00.123456"
    })
  }

  #[test]
  fn test_work_order_list_envelope_and_bare() {
    let envelope = json!({
      "work_orders": [work_order_json(1, "pending", 1)],
      "total_count": 1,
      "work_center_stats": {}
    });
    let list: ApiWorkOrderList = serde_json::from_value(envelope).unwrap();
    let orders = list.into_domain("/work-orders").unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].rn, "WO-1");
    assert_eq!(orders[0].priority_level, PriorityLevel::High);
    assert_eq!(
      orders[0].delivery_date,
      NaiveDate::from_ymd_opt(2024, 3, 1)
    );

    let bare = json!([work_order_json(2, "in_progress", 2)]);
    let list: ApiWorkOrderList = serde_json::from_value(bare).unwrap();
    let orders = list.into_domain("/work-orders").unwrap();
    assert_eq!(orders[0].status, WorkOrderStatus::InProgress);
  }

  #[test]
  fn test_work_order_rejects_unknown_status() {
    let raw: ApiWorkOrder = serde_json::from_value(work_order_json(1, "archived", 1)).unwrap();
    let err = raw.into_domain("/work-orders/1").unwrap_err();
    assert!(matches!(err, ValidationError::MalformedResponse { .. }));
  }

  #[test]
  fn test_work_order_rejects_priority_out_of_range() {
    let raw: ApiWorkOrder = serde_json::from_value(work_order_json(1, "pending", 0)).unwrap();
    assert!(raw.into_domain("/work-orders/1").is_err());
  }

  #[test]
  fn test_timestamps_with_and_without_offset() {
    assert!(parse_timestamp("t", "2024-02-01T09:30:00Z").is_ok());
    assert!(parse_timestamp("t", "2024-02-01T09:30:00+02:00").is_ok());
    assert!(parse_timestamp("t", "2024-02-01 09:30:00").is_ok());
    assert!(parse_timestamp("t", "yesterday").is_err());
  }

  #[test]
  fn test_record_or_ack() {
    let ack: ApiRecordOrAck<ApiWorkOrder> =
      serde_json::from_value(json!({"message": "Status updated successfully", "work_order_id": 1}))
        .unwrap();
    assert!(matches!(ack, ApiRecordOrAck::Ack(_)));

    let record: ApiRecordOrAck<ApiWorkOrder> =
      serde_json::from_value(work_order_json(1, "completed", 3)).unwrap();
    assert!(matches!(record, ApiRecordOrAck::Record(_)));

    let ack: ApiRecordOrAck<ApiWorkCenter> = serde_json::from_value(json!({
      "message": "Work center status updated",
      "work_center": "SAV100",
      "is_active": false
    }))
    .unwrap();
    assert!(matches!(ack, ApiRecordOrAck::Ack(_)));
  }

  #[test]
  fn test_malformed_record_is_not_an_ack() {
    let mut body = work_order_json(1, "in_progress", 1);
    body["priority_level"] = json!("high");
    assert!(serde_json::from_value::<ApiRecordOrAck<ApiWorkOrder>>(body).is_err());

    let mut body = work_order_json(1, "in_progress", 1);
    body.as_object_mut().unwrap().remove("quantity");
    assert!(serde_json::from_value::<ApiRecordOrAck<ApiWorkOrder>>(body).is_err());

    let empty = serde_json::from_value::<ApiRecordOrAck<ApiWorkOrder>>(json!({}));
    assert!(empty.is_err());
  }

  #[test]
  fn test_schedule_sorted_by_sequence_order() {
    let body = json!({
      "work_center": {"code": "SAV100"},
      "schedule": [
        {"operation_id": 3, "work_order_id": 30, "work_order_rn": "WO-3", "naziv": "Weld", "norma": 12.5, "sequence_order": 3},
        {"operation_id": 1, "work_order_id": 10, "work_order_rn": "WO-1", "naziv": "Cut", "norma": null, "sequence_order": 1},
        {"operation_id": 2, "work_order_id": 20, "work_order_rn": "WO-2", "naziv": "Bend", "norma": 4.0, "sequence_order": 2}
      ],
      "total_operations": 3
    });
    let response: ApiScheduleResponse = serde_json::from_value(body).unwrap();
    let schedule = response.into_domain("/scheduling/SAV100", "SAV100").unwrap();
    assert_eq!(schedule.ids(), vec![1, 2, 3]);
    assert!(schedule.is_dense());
    assert_eq!(schedule.items[2].standard_minutes, Some(12.5));
  }

  #[test]
  fn test_schedule_accepts_operations_alias_and_rejects_duplicates() {
    let body = json!({
      "operations": [
        {"operation_id": 1, "work_order_id": 10, "sequence_order": 1},
        {"operation_id": 1, "work_order_id": 10, "sequence_order": 2}
      ]
    });
    let response: ApiScheduleResponse = serde_json::from_value(body).unwrap();
    assert!(response.into_domain("/scheduling/SAV100", "SAV100").is_err());
  }

  #[test]
  fn test_reorder_ack_variants() {
    let ack: ApiReorderResponse = serde_json::from_value(json!({
      "message": "Schedule reordered successfully",
      "work_center": "SAV100",
      "new_sequence": [3, 1, 2]
    }))
    .unwrap();
    let ack = ack.into_domain("/scheduling/reorder", "SAV100", &[3, 1, 2]).unwrap();
    assert_eq!(ack.sequence, vec![3, 1, 2]);

    let empty: ApiReorderResponse = serde_json::from_value(json!({})).unwrap();
    let ack = empty.into_domain("/scheduling/reorder", "SAV100", &[2, 1]).unwrap();
    assert_eq!(ack.work_center, "SAV100");
    assert_eq!(ack.sequence, vec![2, 1]);
  }

  #[test]
  fn test_reorder_ack_must_match_request() {
    let dropped: ApiReorderResponse =
      serde_json::from_value(json!({"new_sequence": [3, 1]})).unwrap();
    let err = dropped
      .into_domain("/scheduling/reorder", "SAV100", &[3, 1, 2])
      .unwrap_err();
    assert!(matches!(err, ValidationError::MalformedResponse { .. }));

    let foreign: ApiReorderResponse =
      serde_json::from_value(json!({"new_sequence": [3, 1, 9]})).unwrap();
    assert!(foreign
      .into_domain("/scheduling/reorder", "SAV100", &[3, 1, 2])
      .is_err());
  }

  #[test]
  fn test_request_bodies() {
    let body = serde_json::to_value(ApiMachineStatusUpdate::new(false)).unwrap();
    assert_eq!(body, json!({"status": "inactive", "is_active": false}));

    let patch = WorkOrderPatch {
      quantity: Some(3),
      ..Default::default()
    };
    let body = serde_json::to_value(ApiWorkOrderUpdate::from(&patch)).unwrap();
    assert_eq!(body, json!({"quantity": 3}));

    let request = OptimizeRequest {
      criteria: crate::api::types::OptimizationCriteria::DeliveryDate,
      work_center: None,
    };
    let body = serde_json::to_value(ApiOptimizeRequest::from(&request)).unwrap();
    assert_eq!(body, json!({"criteria": "datum_isporuke"}));
  }
}
