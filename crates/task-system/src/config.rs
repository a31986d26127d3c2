//! Task manager configuration

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read task manager config: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to deserialize task manager config: {0}")]
	Json(#[from] serde_json::Error),
}

/// Main task manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Worker tuning
	pub worker: WorkerConfig,

	/// Interval between status reads while awaiting a task
	pub await_polling_interval: Duration,

	/// Names used on the message broker by the distributed work queue
	pub broker: BrokerConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			worker: WorkerConfig::default(),
			await_polling_interval: Duration::from_millis(100),
			broker: BrokerConfig::default(),
		}
	}
}

impl Config {
	/// Load configuration from a JSON file, missing fields get their default values
	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		info!(?path, "Loading task manager config");

		Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
	}
}

/// Configuration for a task worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
	/// How often the running task additional information is sampled
	pub additional_information_polling_interval: Duration,

	/// How long a running task body has to honor a cancellation on its own before the worker
	/// preempts it at its next await point
	pub cancellation_grace_period: Duration,

	/// Maximum time the worker waits for the running task to acknowledge its cancellation on close
	pub shutdown_timeout: Duration,

	/// How long a cancellation of a task not running here is remembered, in case the task is
	/// picked later
	pub cancellation_retention: Duration,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			additional_information_polling_interval: Duration::from_secs(1),
			cancellation_grace_period: Duration::from_millis(500),
			shutdown_timeout: Duration::from_secs(10),
			cancellation_retention: Duration::from_secs(60 * 60),
		}
	}
}

/// Configuration for the broker backed work queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
	/// The durable queue shared by every node, consumed by a single node at a time
	pub work_queue: String,

	/// The fan-out exchange where cancellation requests are broadcast
	pub cancel_exchange: String,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			work_queue: "taskManagerWorkQueue".to_string(),
			cancel_exchange: "taskManagerCancelRequestsExchange".to_string(),
		}
	}
}
