use std::time::Duration;

use thiserror::Error;

use super::{
	broker::BrokerError, config::ConfigError, journal::JournalError, registry::RegistryError,
	task::TaskId,
};

#[derive(Debug, Error)]
pub enum Error {
	#[error("task not found: <id='{0}'>")]
	NotFound(TaskId),
	#[error("reached timeout awaiting task <id='{task_id}', timeout='{timeout:?}'>")]
	Timeout { task_id: TaskId, timeout: Duration },
	#[error("task manager was stopped")]
	Stopped,
	#[error("concurrent modifications of task <id='{0}'> could not be resolved")]
	ConcurrentModification(TaskId),

	#[error(transparent)]
	Registry(#[from] RegistryError),
	#[error(transparent)]
	Journal(#[from] JournalError),
	#[error(transparent)]
	Broker(#[from] BrokerError),
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error("failed to serialize task payload: {0}")]
	Payload(#[from] serde_json::Error),
}
