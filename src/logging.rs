//! Tracing setup for the `shopfloor` binary.
//!
//! Logs go to `<data dir>/shopfloor/shopfloor.log` through a non-blocking
//! writer. The filter comes from `SHOPFLOOR_LOG` (e.g.
//! `SHOPFLOOR_LOG=shopfloor::cache=debug`) and defaults to `info`.

use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_ENV: &str = "SHOPFLOOR_LOG";
const LOG_FILE: &str = "shopfloor.log";

/// Directory the log file is written to.
pub fn log_dir() -> PathBuf {
  dirs::data_dir()
    .unwrap_or_else(std::env::temp_dir)
    .join("shopfloor")
}

fn filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. With `verbose` logs are mirrored to stderr.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
  let dir = log_dir();
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, LOG_FILE));

  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_target(true)
    .with_ansi(false)
    .with_filter(filter());

  let stderr_layer = verbose.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
      .compact()
      .with_filter(filter())
  });

  tracing_subscriber::registry()
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  tracing::debug!(log_file = %dir.join(LOG_FILE).display(), "logging initialised");
  Ok(guard)
}
