//! Error types for the synchronization layer.
//!
//! Every error here is `Clone`: a single in-flight fetch hands the same
//! outcome to all callers that joined it.

use thiserror::Error;

/// Input or payload that failed validation.
///
/// Raised before anything is sent to the network, or at the decode boundary
/// when the server answers with data that does not fit the domain model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("{field} must not be empty")]
  Empty { field: &'static str },

  #[error("{field} must be positive, got {value}")]
  NotPositive { field: &'static str, value: i64 },

  #[error("unknown work order status `{0}`")]
  UnknownStatus(String),

  #[error("priority level must be 1, 2 or 3, got {0}")]
  PriorityLevel(i64),

  #[error("duplicate operation {0} in schedule")]
  DuplicateOperation(i64),

  #[error("reordered schedule must contain the same operations: {0}")]
  ReorderMembership(String),

  #[error("schedule for {work_center} is not loaded")]
  ScheduleNotLoaded { work_center: String },

  #[error("malformed response from {endpoint}: {message}")]
  MalformedResponse { endpoint: String, message: String },
}

impl ValidationError {
  pub(crate) fn malformed(endpoint: &str, message: impl ToString) -> Self {
    Self::MalformedResponse {
      endpoint: endpoint.to_string(),
      message: message.to_string(),
    }
  }
}

/// Failure talking to the production API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  #[error("request to {endpoint} timed out")]
  Timeout { endpoint: String },

  #[error("{endpoint} returned HTTP {status}: {message}")]
  Status {
    endpoint: String,
    status: u16,
    message: String,
  },

  #[error("network error calling {endpoint}: {message}")]
  Transport { endpoint: String, message: String },

  #[error(transparent)]
  Malformed(#[from] ValidationError),
}

impl ApiError {
  pub fn is_timeout(&self) -> bool {
    matches!(self, ApiError::Timeout { .. })
  }
}

/// A read that could not be applied to its cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  #[error("failed to load {key}: {source}")]
  Api {
    key: String,
    #[source]
    source: ApiError,
  },

  #[error("fetch for {key} was cancelled")]
  Cancelled { key: String },

  #[error("{key} has never been loaded, nothing to refetch")]
  NoFetcher { key: String },
}

impl FetchError {
  pub(crate) fn api(key: impl Into<String>, source: ApiError) -> Self {
    Self::Api {
      key: key.into(),
      source,
    }
  }
}

/// A write that was rejected or failed.
///
/// `Failed` is only returned after the optimistic state has been rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
  #[error(transparent)]
  Invalid(#[from] ValidationError),

  #[error("{entity} already has a pending change")]
  Busy { entity: String },

  #[error("{mutation} failed and was rolled back: {source}")]
  Failed {
    mutation: &'static str,
    #[source]
    source: ApiError,
  },
}

impl MutationError {
  /// Whether the caller may simply re-invoke the same operation.
  pub fn is_retryable(&self) -> bool {
    match self {
      MutationError::Invalid(_) => false,
      MutationError::Busy { .. } => true,
      MutationError::Failed { source, .. } => !matches!(source, ApiError::Malformed(_)),
    }
  }
}
