//! `reqwest` implementation of [`ProductionApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};
use url::Url;

use super::api_types::{
  ApiMachineStatusUpdate, ApiOptimizeRequest, ApiOptimizeResponse, ApiRecordOrAck,
  ApiReorderRequest, ApiReorderResponse, ApiScheduleResponse, ApiStatusUpdate, ApiWorkCenter,
  ApiWorkOrder, ApiWorkOrderCreate, ApiWorkOrderList, ApiWorkOrderUpdate,
};
use super::types::{
  OperationId, OptimizeRequest, OptimizedSchedule, ReorderAck, Schedule, WorkCenter, WorkOrder,
  WorkOrderDraft, WorkOrderFilter, WorkOrderId, WorkOrderPatch, WorkOrderStatus,
};
use super::ProductionApi;
use crate::config::ApiConfig;
use crate::error::{ApiError, ValidationError};

/// HTTP client for the production API
#[derive(Clone)]
pub struct HttpClient {
  client: Client,
  base_url: Url,
}

impl std::fmt::Debug for HttpClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HttpClient")
      .field("base_url", &self.base_url.as_str())
      .finish_non_exhaustive()
  }
}

impl HttpClient {
  pub fn new(config: &ApiConfig) -> color_eyre::Result<Self> {
    // Url::join drops the last segment unless the base ends with a slash
    let mut base = config.url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url = Url::parse(&base)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid API url '{}': {}", config.url, e))?;

    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(format!("shopfloor/{}", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    debug!(base_url = %base_url, timeout_secs = config.timeout_secs, "created HttpClient");
    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url(&self, path: &str) -> Result<Url, ApiError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ApiError::Transport {
        endpoint: path.to_string(),
        message: format!("invalid url: {}", e),
      })
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
    Ok(self.client.request(method, self.url(path)?))
  }

  async fn send<T: DeserializeOwned>(
    &self,
    endpoint: &str,
    request: RequestBuilder,
  ) -> Result<T, ApiError> {
    let response = request.send().await.map_err(|e| transport(endpoint, e))?;

    let status = response.status();
    if !status.is_success() {
      let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
      error!(endpoint, status = status.as_u16(), %message, "request failed");
      return Err(ApiError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
      });
    }

    let body = response.bytes().await.map_err(|e| transport(endpoint, e))?;
    // Some endpoints answer writes with an empty body
    let body: &[u8] = if body.is_empty() { b"null" } else { &body };
    serde_json::from_slice(body)
      .map_err(|e| ApiError::Malformed(ValidationError::malformed(endpoint, e)))
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
    debug!(endpoint = path, "GET");
    self.send(path, self.request(Method::GET, path)?).await
  }

  async fn write<B: Serialize + Sync, T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: &B,
  ) -> Result<T, ApiError> {
    debug!(endpoint = path, %method, "write");
    self.send(path, self.request(method, path)?.json(body)).await
  }
}

fn transport(endpoint: &str, e: reqwest::Error) -> ApiError {
  if e.is_timeout() {
    ApiError::Timeout {
      endpoint: endpoint.to_string(),
    }
  } else {
    ApiError::Transport {
      endpoint: endpoint.to_string(),
      message: e.to_string(),
    }
  }
}

fn record_or_ack(
  endpoint: &str,
  body: ApiRecordOrAck<ApiWorkOrder>,
) -> Result<Option<WorkOrder>, ApiError> {
  match body {
    ApiRecordOrAck::Record(order) => Ok(Some(order.into_domain(endpoint)?)),
    ApiRecordOrAck::Ack(_) => Ok(None),
  }
}

#[async_trait]
impl ProductionApi for HttpClient {
  async fn work_orders(&self, filter: &WorkOrderFilter) -> Result<Vec<WorkOrder>, ApiError> {
    let endpoint = "/work-orders";
    let mut url = self.url(endpoint)?;
    for (name, value) in filter.query_pairs() {
      url.query_pairs_mut().append_pair(name, &value);
    }
    let body: ApiWorkOrderList = self.send(endpoint, self.client.get(url)).await?;
    Ok(body.into_domain(endpoint)?)
  }

  async fn work_order(&self, id: WorkOrderId) -> Result<WorkOrder, ApiError> {
    let endpoint = format!("/work-orders/{}", id);
    let body: ApiWorkOrder = self.get(&endpoint).await?;
    Ok(body.into_domain(&endpoint)?)
  }

  async fn create_work_order(&self, draft: &WorkOrderDraft) -> Result<WorkOrder, ApiError> {
    let endpoint = "/work-orders";
    let body: ApiWorkOrder = self
      .write(Method::POST, endpoint, &ApiWorkOrderCreate::from(draft))
      .await?;
    Ok(body.into_domain(endpoint)?)
  }

  async fn update_work_order(
    &self,
    id: WorkOrderId,
    patch: &WorkOrderPatch,
  ) -> Result<WorkOrder, ApiError> {
    let endpoint = format!("/work-orders/{}", id);
    let body: ApiWorkOrder = self
      .write(Method::PUT, &endpoint, &ApiWorkOrderUpdate::from(patch))
      .await?;
    Ok(body.into_domain(&endpoint)?)
  }

  async fn set_work_order_status(
    &self,
    id: WorkOrderId,
    status: WorkOrderStatus,
  ) -> Result<Option<WorkOrder>, ApiError> {
    let endpoint = format!("/work-orders/{}/status", id);
    let body: ApiRecordOrAck<ApiWorkOrder> = self
      .write(Method::PATCH, &endpoint, &ApiStatusUpdate { status })
      .await?;
    record_or_ack(&endpoint, body)
  }

  async fn delete_work_order(&self, id: WorkOrderId) -> Result<(), ApiError> {
    let endpoint = format!("/work-orders/{}", id);
    let _: serde_json::Value = self
      .send(&endpoint, self.request(Method::DELETE, &endpoint)?)
      .await?;
    Ok(())
  }

  async fn machines(&self) -> Result<Vec<WorkCenter>, ApiError> {
    let endpoint = "/machines";
    let body: Vec<ApiWorkCenter> = self.get(endpoint).await?;
    Ok(
      body
        .into_iter()
        .map(|wc| wc.into_domain(endpoint))
        .collect::<Result<_, _>>()?,
    )
  }

  async fn machine(&self, code: &str) -> Result<WorkCenter, ApiError> {
    let endpoint = format!("/machines/{}", code);
    let body: ApiWorkCenter = self.get(&endpoint).await?;
    Ok(body.into_domain(&endpoint)?)
  }

  async fn set_machine_active(
    &self,
    code: &str,
    is_active: bool,
  ) -> Result<Option<WorkCenter>, ApiError> {
    let endpoint = format!("/machines/{}/status", code);
    let body: ApiRecordOrAck<ApiWorkCenter> = self
      .write(Method::PATCH, &endpoint, &ApiMachineStatusUpdate::new(is_active))
      .await?;
    match body {
      ApiRecordOrAck::Record(wc) => Ok(Some(wc.into_domain(&endpoint)?)),
      ApiRecordOrAck::Ack(_) => Ok(None),
    }
  }

  async fn machine_calendar(&self, code: &str) -> Result<serde_json::Value, ApiError> {
    self.get(&format!("/machines/{}/calendar", code)).await
  }

  async fn schedule(&self, work_center: &str) -> Result<Schedule, ApiError> {
    let endpoint = format!("/scheduling/{}", work_center);
    let body: ApiScheduleResponse = self.get(&endpoint).await?;
    Ok(body.into_domain(&endpoint, work_center)?)
  }

  async fn optimize(&self, request: &OptimizeRequest) -> Result<OptimizedSchedule, ApiError> {
    let endpoint = "/scheduling/optimize";
    let body: ApiOptimizeResponse = self
      .write(Method::POST, endpoint, &ApiOptimizeRequest::from(request))
      .await?;
    Ok(body.into_domain(endpoint, request.work_center.as_deref())?)
  }

  async fn reorder(
    &self,
    work_center: &str,
    order: &[OperationId],
  ) -> Result<ReorderAck, ApiError> {
    let endpoint = "/scheduling/reorder";
    let request = ApiReorderRequest {
      work_center,
      new_order: order,
    };
    let body: ApiReorderResponse = self.write(Method::POST, endpoint, &request).await?;
    Ok(body.into_domain(endpoint, work_center, order)?)
  }
}
