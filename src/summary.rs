//! Headline figures for the dashboard landing view.

use chrono::NaiveDate;

use crate::api::types::{PriorityLevel, WorkOrder, WorkOrderStatus};

/// How many orders the "recent activity" list shows.
pub const RECENT_LIMIT: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
  pub total: usize,
  pub in_progress: usize,
  pub pending: usize,
  pub completed: usize,
  /// Completed orders last updated on `today` (UTC)
  pub completed_today: usize,
  /// Priority 1 orders
  pub urgent: usize,
  /// Completed share of all orders in whole percent; 0 without orders
  pub completion_rate: u8,
  /// Most recently updated first
  pub recent: Vec<WorkOrder>,
}

impl DashboardSummary {
  pub fn from_work_orders(orders: &[WorkOrder], today: NaiveDate) -> Self {
    let count = |status: WorkOrderStatus| orders.iter().filter(|o| o.status == status).count();
    let completed = count(WorkOrderStatus::Completed);
    let completed_today = orders
      .iter()
      .filter(|o| o.status == WorkOrderStatus::Completed && o.updated_at.date_naive() == today)
      .count();
    let completion_rate = if orders.is_empty() {
      0
    } else {
      (completed as f64 / orders.len() as f64 * 100.0).round() as u8
    };

    let mut recent = orders.to_vec();
    recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    recent.truncate(RECENT_LIMIT);

    Self {
      total: orders.len(),
      in_progress: count(WorkOrderStatus::InProgress),
      pending: count(WorkOrderStatus::Pending),
      completed,
      completed_today,
      urgent: orders
        .iter()
        .filter(|o| o.priority_level == PriorityLevel::High)
        .count(),
      completion_rate,
      recent,
    }
  }
}
