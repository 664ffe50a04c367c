//! Per-machine figures shown next to each work center.
//!
//! Nothing here is ever made up: a figure that cannot be derived from real
//! data is [`Metric::Unavailable`] and views render it as such.

use crate::api::types::WorkCenter;
use crate::api::{ProductionCache, QueryData, QueryKey};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric<T> {
  Available(T),
  Unavailable,
}

impl<T> Metric<T> {
  pub fn value(&self) -> Option<&T> {
    match self {
      Metric::Available(value) => Some(value),
      Metric::Unavailable => None,
    }
  }

  pub fn is_available(&self) -> bool {
    matches!(self, Metric::Available(_))
  }
}

impl<T> From<Option<T>> for Metric<T> {
  fn from(value: Option<T>) -> Self {
    value.map_or(Metric::Unavailable, Metric::Available)
  }
}

impl<T: std::fmt::Display> std::fmt::Display for Metric<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Metric::Available(value) => value.fmt(f),
      Metric::Unavailable => f.write_str("n/a"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineMetrics {
  /// Operations queued on the machine
  pub operations: Metric<usize>,
  /// Planned minutes as a percentage of one day's capacity, capped at 100
  pub utilization_percent: Metric<f64>,
}

impl MachineMetrics {
  pub const UNAVAILABLE: MachineMetrics = MachineMetrics {
    operations: Metric::Unavailable,
    utilization_percent: Metric::Unavailable,
  };
}

/// Source of machine metrics.
pub trait MetricsProvider: Send + Sync {
  fn machine_metrics(&self, machine: &WorkCenter) -> MachineMetrics;
}

/// Provider for deployments without any metrics source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetrics;

impl MetricsProvider for NoMetrics {
  fn machine_metrics(&self, _machine: &WorkCenter) -> MachineMetrics {
    MachineMetrics::UNAVAILABLE
  }
}

/// Derives metrics from the machine's cached schedule. Never fetches.
#[derive(Debug, Clone)]
pub struct ScheduleMetrics {
  cache: ProductionCache,
}

impl ScheduleMetrics {
  pub fn new(cache: ProductionCache) -> Self {
    Self { cache }
  }
}

impl MetricsProvider for ScheduleMetrics {
  fn machine_metrics(&self, machine: &WorkCenter) -> MachineMetrics {
    let Some(snapshot) = self.cache.peek(&QueryKey::Schedule(machine.code.clone())) else {
      return MachineMetrics::UNAVAILABLE;
    };
    let Some(schedule) = snapshot.data().and_then(QueryData::as_schedule) else {
      return MachineMetrics::UNAVAILABLE;
    };

    let capacity_minutes = machine.capacity_hours_per_day * 60.0;
    let utilization = (capacity_minutes > 0.0)
      .then(|| (schedule.planned_minutes() / capacity_minutes * 100.0).min(100.0));

    MachineMetrics {
      operations: Metric::Available(schedule.len()),
      utilization_percent: utilization.into(),
    }
  }
}
