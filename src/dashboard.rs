//! The dashboard session: one cache, one API and the writers over them.
//!
//! Constructed explicitly with [`Dashboard::init`] (or [`Dashboard::with_api`]
//! in tests) and passed by reference to whatever renders it. Several
//! dashboards can live side by side; nothing is global.

use std::sync::Arc;

use chrono::NaiveDate;
use color_eyre::Result;
use futures::future::BoxFuture;
use tracing::info;

use crate::api::types::{
  OperationId, OptimizationCriteria, OptimizedSchedule, Schedule, WorkCenter, WorkOrder,
  WorkOrderDraft, WorkOrderFilter, WorkOrderId, WorkOrderPatch, WorkOrderStatus,
};
use crate::api::{Fetcher, HttpClient, ProductionApi, ProductionCache, QueryData, QueryKey};
use crate::cache::QueryCache;
use crate::config::Config;
use crate::error::{FetchError, MutationError, ValidationError};
use crate::metrics::{MachineMetrics, MetricsProvider, ScheduleMetrics};
use crate::mutation::machines::SetMachineActive;
use crate::mutation::schedule::{DropOutcome, ReorderOutcome, ScheduleReorderEngine};
use crate::mutation::work_orders::{
  CreateWorkOrder, DeleteWorkOrder, SetWorkOrderStatus, UpdateWorkOrder,
};
use crate::mutation::MutationExecutor;
use crate::query::{Projection, Query};
use crate::summary::DashboardSummary;

fn require_code(code: &str) -> Result<(), ValidationError> {
  if code.trim().is_empty() {
    return Err(ValidationError::Empty { field: "work_center" });
  }
  Ok(())
}

fn require_id(id: WorkOrderId) -> Result<(), ValidationError> {
  if id <= 0 {
    return Err(ValidationError::NotPositive {
      field: "work_order_id",
      value: id,
    });
  }
  Ok(())
}

pub struct Dashboard {
  config: Config,
  cache: ProductionCache,
  fetcher: Fetcher,
  executor: MutationExecutor,
  schedules: ScheduleReorderEngine,
  metrics: Arc<dyn MetricsProvider>,
}

impl Dashboard {
  /// Connect to the API named in `config`.
  pub fn init(config: Config) -> Result<Self> {
    let client = HttpClient::new(&config.api)?;
    info!(url = %config.api.url, "dashboard initialised");
    Ok(Self::with_api(Arc::new(client), config))
  }

  pub fn with_api(api: Arc<dyn ProductionApi>, config: Config) -> Self {
    let cache: ProductionCache = QueryCache::new(config.cache_config());
    let executor = MutationExecutor::new(cache.clone(), Arc::clone(&api), config.api.timeout());
    Self {
      fetcher: Fetcher::new(api),
      schedules: ScheduleReorderEngine::new(executor.clone()),
      metrics: Arc::new(ScheduleMetrics::new(cache.clone())),
      executor,
      cache,
      config,
    }
  }

  /// Replace the metrics source.
  pub fn with_metrics(mut self, metrics: Arc<dyn MetricsProvider>) -> Self {
    self.metrics = metrics;
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &ProductionCache {
    &self.cache
  }

  pub fn executor(&self) -> &MutationExecutor {
    &self.executor
  }

  pub fn schedules(&self) -> &ScheduleReorderEngine {
    &self.schedules
  }

  fn query<T>(&self, key: QueryKey, project: Projection<T>) -> Query<T> {
    let options = self.config.freshness.options_for(&key);
    Query::subscribe(&self.cache, &self.fetcher, key, options, project)
  }

  // Reads

  pub fn work_orders(&self, filter: WorkOrderFilter) -> Query<Vec<WorkOrder>> {
    self.query(QueryKey::WorkOrders(filter), QueryData::as_work_orders)
  }

  pub fn work_order(&self, id: WorkOrderId) -> Result<Query<WorkOrder>, ValidationError> {
    require_id(id)?;
    Ok(self.query(QueryKey::WorkOrder(id), QueryData::as_work_order))
  }

  pub fn machines(&self) -> Query<Vec<WorkCenter>> {
    self.query(QueryKey::Machines, QueryData::as_machines)
  }

  pub fn machine(&self, code: &str) -> Result<Query<WorkCenter>, ValidationError> {
    require_code(code)?;
    Ok(self.query(QueryKey::Machine(code.to_string()), QueryData::as_machine))
  }

  pub fn machine_calendar(&self, code: &str) -> Result<Query<serde_json::Value>, ValidationError> {
    require_code(code)?;
    Ok(self.query(
      QueryKey::MachineCalendar(code.to_string()),
      QueryData::as_calendar,
    ))
  }

  pub fn schedule(&self, work_center: &str) -> Result<Query<Schedule>, ValidationError> {
    require_code(work_center)?;
    Ok(self.query(
      QueryKey::Schedule(work_center.to_string()),
      QueryData::as_schedule,
    ))
  }

  // Writes

  pub fn create_work_order(
    &self,
    draft: WorkOrderDraft,
  ) -> BoxFuture<'static, Result<WorkOrder, MutationError>> {
    self.executor.submit(CreateWorkOrder { draft })
  }

  pub fn update_work_order(
    &self,
    id: WorkOrderId,
    patch: WorkOrderPatch,
  ) -> BoxFuture<'static, Result<WorkOrder, MutationError>> {
    self.executor.submit(UpdateWorkOrder { id, patch })
  }

  pub fn set_work_order_status(
    &self,
    id: WorkOrderId,
    status: WorkOrderStatus,
  ) -> BoxFuture<'static, Result<Option<WorkOrder>, MutationError>> {
    self.executor.submit(SetWorkOrderStatus { id, status })
  }

  pub fn delete_work_order(&self, id: WorkOrderId) -> BoxFuture<'static, Result<(), MutationError>> {
    self.executor.submit(DeleteWorkOrder { id })
  }

  pub fn set_machine_active(
    &self,
    code: &str,
    is_active: bool,
  ) -> BoxFuture<'static, Result<Option<WorkCenter>, MutationError>> {
    self.executor.submit(SetMachineActive {
      code: code.to_string(),
      is_active,
    })
  }

  /// Apply a drag result to a work center's schedule.
  pub fn move_operation(
    &self,
    work_center: &str,
    drop: DropOutcome,
  ) -> BoxFuture<'static, Result<ReorderOutcome, MutationError>> {
    self.schedules.handle_drop(work_center, drop)
  }

  pub fn reorder_schedule(
    &self,
    work_center: &str,
    previous: Vec<OperationId>,
    next: Vec<OperationId>,
  ) -> BoxFuture<'static, Result<ReorderOutcome, MutationError>> {
    self.schedules.reorder(work_center, previous, next)
  }

  /// Optimize one work center, or every schedule when `work_center` is `None`.
  pub fn optimize(
    &self,
    criteria: OptimizationCriteria,
    work_center: Option<String>,
  ) -> BoxFuture<'static, Result<OptimizedSchedule, MutationError>> {
    self.schedules.optimize(criteria, work_center)
  }

  // Derived views

  /// Summary over all work orders, served from the cache when fresh.
  pub async fn summary(&self, today: NaiveDate) -> Result<DashboardSummary, FetchError> {
    let key = QueryKey::WorkOrders(WorkOrderFilter::default());
    let options = self.config.freshness.options_for(&key);
    let fetch = self.fetcher.for_key(&key);
    let data = self.cache.fetch(key, fetch, options).await?;
    let orders = data.as_work_orders().map(Vec::as_slice).unwrap_or_default();
    Ok(DashboardSummary::from_work_orders(orders, today))
  }

  pub fn machine_metrics(&self, machine: &WorkCenter) -> MachineMetrics {
    self.metrics.machine_metrics(machine)
  }

  /// Stop every fetch and refresh timer and drop all cached data. Open
  /// queries stop receiving updates.
  pub fn teardown(&self) {
    info!(entries = self.cache.len(), "dashboard teardown");
    self.cache.teardown();
  }
}

impl std::fmt::Debug for Dashboard {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Dashboard")
      .field("api", &self.config.api.url)
      .field("cache", &self.cache)
      .field("executor", &self.executor)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::api::fake::{endpoint, FakeApi};
  use crate::metrics::{Metric, NoMetrics};
  use crate::query::QueryState;

  fn dashboard() -> (Arc<FakeApi>, Dashboard) {
    let api = Arc::new(FakeApi::seeded());
    (api.clone(), Dashboard::with_api(api, Config::default()))
  }

  #[tokio::test]
  async fn test_empty_identifiers_are_rejected() {
    let (api, dashboard) = dashboard();
    assert!(matches!(
      dashboard.schedule("").unwrap_err(),
      ValidationError::Empty { field: "work_center" }
    ));
    assert!(dashboard.machine("  ").is_err());
    assert!(dashboard.machine_calendar("").is_err());
    assert!(matches!(
      dashboard.work_order(0).unwrap_err(),
      ValidationError::NotPositive { .. }
    ));
    assert!(dashboard.cache().is_empty());
    assert_eq!(api.calls(endpoint::SCHEDULE), 0);
  }

  #[tokio::test]
  async fn test_status_change_seen_through_query() {
    let (api, dashboard) = dashboard();
    let mut orders = dashboard.work_orders(WorkOrderFilter::default());
    orders.settled().await.unwrap();
    api.hold(endpoint::SET_WORK_ORDER_STATUS);

    let write = tokio::spawn(dashboard.set_work_order_status(1, WorkOrderStatus::InProgress));
    assert!(orders.poll());
    let status = orders.data().and_then(|o| o.iter().find(|o| o.id == 1)).map(|o| o.status);
    assert_eq!(status, Some(WorkOrderStatus::InProgress));

    api.release(endpoint::SET_WORK_ORDER_STATUS);
    write.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    orders.poll();
    assert!(!orders.is_fetching());
    assert_eq!(api.calls(endpoint::WORK_ORDERS), 2);
  }

  #[tokio::test]
  async fn test_queries_use_configured_freshness() {
    let (_api, dashboard) = dashboard();
    let machines = dashboard.machines();
    assert!(machines.has_refresh_timer());
    let detail = dashboard.machine("SAV100").unwrap();
    assert!(!detail.has_refresh_timer());
  }

  #[tokio::test]
  async fn test_teardown_ends_queries() {
    let (_api, dashboard) = dashboard();
    let mut schedule = dashboard.schedule("SAV100").unwrap();
    schedule.settled().await.unwrap();

    dashboard.teardown();
    assert!(!schedule.changed().await);
    assert!(dashboard.cache().is_empty());
    // Data seen before teardown is still rendered
    assert!(matches!(schedule.state(), QueryState::Success(_)));
  }

  #[tokio::test]
  async fn test_summary_and_metrics() {
    let (_api, dashboard) = dashboard();
    let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let summary = dashboard.summary(today).await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed_today, 1);
    assert_eq!(summary.completion_rate, 33);

    let mut machines = dashboard.machines();
    let sav100 = machines.settled().await.unwrap()[0].clone();
    assert_eq!(
      dashboard.machine_metrics(&sav100).operations,
      Metric::Unavailable
    );
    let mut schedule = dashboard.schedule("SAV100").unwrap();
    schedule.settled().await.unwrap();
    assert_eq!(
      dashboard.machine_metrics(&sav100).operations,
      Metric::Available(3)
    );

    let dashboard = dashboard.with_metrics(Arc::new(NoMetrics));
    assert_eq!(dashboard.machine_metrics(&sav100), MachineMetrics::UNAVAILABLE);
  }

  #[tokio::test]
  async fn test_separate_dashboards_are_isolated() {
    let (api, first) = dashboard();
    let second = Dashboard::with_api(api.clone(), Config::default());
    first.machines().settled().await.unwrap();
    second.machines().settled().await.unwrap();
    assert_eq!(api.calls(endpoint::MACHINES), 2);

    first.teardown();
    assert!(first.cache().is_empty());
    assert_eq!(second.cache().len(), 1);
  }
}
