//! Client-side synchronization for the shop floor dashboard: a keyed query
//! cache over the production API and an optimistic mutation engine for work
//! orders, work centers and schedules.

pub mod api;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod mutation;
pub mod query;
pub mod summary;

pub use dashboard::Dashboard;
pub use error::{ApiError, FetchError, MutationError, ValidationError};
