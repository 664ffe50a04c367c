//! The production API collaborator and everything that talks to it.

pub mod api_types;
pub mod client;
#[cfg(test)]
pub mod fake;
pub mod fetcher;
pub mod keys;
pub mod types;

use async_trait::async_trait;

use crate::error::ApiError;
use types::{
  OperationId, OptimizeRequest, OptimizedSchedule, ReorderAck, Schedule, WorkCenter, WorkOrder,
  WorkOrderDraft, WorkOrderFilter, WorkOrderId, WorkOrderPatch, WorkOrderStatus,
};

pub use client::HttpClient;
pub use fetcher::Fetcher;
pub use keys::{KeyScope, ProductionCache, QueryData, QueryKey};

/// Remote endpoints consumed by the dashboard.
///
/// Implementations return decoded, validated domain values; they do no
/// caching of their own.
#[async_trait]
pub trait ProductionApi: Send + Sync {
  /// `GET /work-orders?work_center&status&urgent_only`
  async fn work_orders(&self, filter: &WorkOrderFilter) -> Result<Vec<WorkOrder>, ApiError>;

  /// `GET /work-orders/{id}`
  async fn work_order(&self, id: WorkOrderId) -> Result<WorkOrder, ApiError>;

  /// `POST /work-orders`
  async fn create_work_order(&self, draft: &WorkOrderDraft) -> Result<WorkOrder, ApiError>;

  /// `PUT /work-orders/{id}`
  async fn update_work_order(
    &self,
    id: WorkOrderId,
    patch: &WorkOrderPatch,
  ) -> Result<WorkOrder, ApiError>;

  /// `PATCH /work-orders/{id}/status`. `None` when the server only acknowledges.
  async fn set_work_order_status(
    &self,
    id: WorkOrderId,
    status: WorkOrderStatus,
  ) -> Result<Option<WorkOrder>, ApiError>;

  /// `DELETE /work-orders/{id}`
  async fn delete_work_order(&self, id: WorkOrderId) -> Result<(), ApiError>;

  /// `GET /machines`
  async fn machines(&self) -> Result<Vec<WorkCenter>, ApiError>;

  /// `GET /machines/{code}`
  async fn machine(&self, code: &str) -> Result<WorkCenter, ApiError>;

  /// `PATCH /machines/{code}/status`. `None` when the server only acknowledges.
  async fn set_machine_active(
    &self,
    code: &str,
    is_active: bool,
  ) -> Result<Option<WorkCenter>, ApiError>;

  /// `GET /machines/{code}/calendar`; opaque to the dashboard.
  async fn machine_calendar(&self, code: &str) -> Result<serde_json::Value, ApiError>;

  /// `GET /scheduling/{work_center}`
  async fn schedule(&self, work_center: &str) -> Result<Schedule, ApiError>;

  /// `POST /scheduling/optimize`
  async fn optimize(&self, request: &OptimizeRequest) -> Result<OptimizedSchedule, ApiError>;

  /// `POST /scheduling/reorder` with the full ordered id list.
  async fn reorder(&self, work_center: &str, order: &[OperationId])
    -> Result<ReorderAck, ApiError>;
}
