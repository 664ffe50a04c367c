//! Maps a [`QueryKey`] to exactly one read against the API.

use std::sync::Arc;

use super::keys::{QueryData, QueryKey};
use super::ProductionApi;
use crate::cache::{fetch_fn, FetchFn};

/// Builds fetch functions for cache keys. Holds no state besides the API.
#[derive(Clone)]
pub struct Fetcher {
  api: Arc<dyn ProductionApi>,
}

impl Fetcher {
  pub fn new(api: Arc<dyn ProductionApi>) -> Self {
    Self { api }
  }

  pub fn api(&self) -> &Arc<dyn ProductionApi> {
    &self.api
  }

  pub fn for_key(&self, key: &QueryKey) -> FetchFn<QueryData> {
    let api = Arc::clone(&self.api);
    let key = key.clone();
    fetch_fn(move || {
      let api = Arc::clone(&api);
      let key = key.clone();
      async move {
        match key {
          QueryKey::WorkOrders(filter) => api.work_orders(&filter).await.map(QueryData::WorkOrders),
          QueryKey::WorkOrder(id) => api.work_order(id).await.map(QueryData::WorkOrder),
          QueryKey::Machines => api.machines().await.map(QueryData::Machines),
          QueryKey::Machine(code) => api.machine(&code).await.map(QueryData::Machine),
          QueryKey::MachineCalendar(code) => {
            api.machine_calendar(&code).await.map(QueryData::Calendar)
          }
          QueryKey::Schedule(wc) => api.schedule(&wc).await.map(QueryData::Schedule),
        }
      }
    })
  }
}

impl std::fmt::Debug for Fetcher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Fetcher").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::fake::{endpoint, FakeApi};
  use crate::api::types::WorkOrderFilter;

  #[tokio::test]
  async fn test_each_key_hits_its_endpoint() {
    let api = Arc::new(FakeApi::seeded());
    let fetcher = Fetcher::new(api.clone());

    let data = (fetcher.for_key(&QueryKey::Schedule("SAV100".into())))()
      .await
      .unwrap();
    assert_eq!(data.as_schedule().unwrap().ids(), vec![101, 102, 103]);
    assert_eq!(api.calls(endpoint::SCHEDULE), 1);

    let data = (fetcher.for_key(&QueryKey::WorkOrders(WorkOrderFilter::default())))()
      .await
      .unwrap();
    assert_eq!(data.as_work_orders().unwrap().len(), 3);

    let data = (fetcher.for_key(&QueryKey::Machines))().await.unwrap();
    assert_eq!(data.as_machines().unwrap().len(), 2);
    assert_eq!(api.calls(endpoint::MACHINES), 1);
    assert_eq!(api.calls(endpoint::WORK_ORDERS), 1);
  }

  #[tokio::test]
  async fn test_failures_pass_through() {
    let api = Arc::new(FakeApi::seeded());
    api.fail(endpoint::MACHINES, 503);
    let fetcher = Fetcher::new(api.clone());
    let err = (fetcher.for_key(&QueryKey::Machines))().await.unwrap_err();
    assert!(matches!(err, crate::error::ApiError::Status { status: 503, .. }));
  }
}
