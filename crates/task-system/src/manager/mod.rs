use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::trace;

use super::{
	details::{Status, TaskExecutionDetails},
	error::Error,
	task::{Task, TaskId},
};

mod event_sourcing;
mod memory;

pub use event_sourcing::EventSourcingTaskManager;
pub use memory::MemoryTaskManager;

/// Default interval between status reads while awaiting a task
pub const DEFAULT_AWAIT_POLLING_INTERVAL: Duration = Duration::from_millis(100);

/// A cancellation requested before any node picked the task.
fn cancelled_while_waiting(details: &TaskExecutionDetails) -> bool {
	details.status == Status::CancelRequested && details.started_date.is_none()
}

/// The entry point to submit and follow long-running tasks.
#[async_trait]
pub trait TaskManager: Send + Sync {
	/// Registers `task` as waiting and queues it, returns the identifier the task can be
	/// followed with.
	async fn submit(&self, task: Arc<dyn Task>) -> Result<TaskId, Error>;

	async fn get_execution_details(&self, task_id: TaskId) -> Result<TaskExecutionDetails, Error>;

	/// Every known task, in submission order.
	async fn list(&self) -> Result<Vec<TaskExecutionDetails>, Error>;

	async fn list_by_status(&self, status: Status) -> Result<Vec<TaskExecutionDetails>, Error> {
		Ok(self
			.list()
			.await?
			.into_iter()
			.filter(|details| details.status == status)
			.collect())
	}

	/// Requests the cancellation of a task. Unknown and already finished tasks are left alone,
	/// and asking twice is the same as asking once.
	async fn cancel(&self, task_id: TaskId) -> Result<(), Error>;

	/// Waits until the task reaches a terminal status.
	///
	/// Fails with [`Error::NotFound`] right away for unknown tasks and with [`Error::Timeout`] if
	/// the task is still going after `timeout_after`, which leaves the task untouched.
	async fn await_task(
		&self,
		task_id: TaskId,
		timeout_after: Duration,
	) -> Result<TaskExecutionDetails, Error> {
		let polling_interval = self.await_polling_interval();

		timeout(timeout_after, async {
			loop {
				let details = self.get_execution_details(task_id).await?;
				if details.is_finished() {
					return Ok(details);
				}

				trace!(%task_id, status = %details.status, "Awaited task still running");
				sleep(polling_interval).await;
			}
		})
		.await
		.map_err(|_| Error::Timeout {
			task_id,
			timeout: timeout_after,
		})?
	}

	fn await_polling_interval(&self) -> Duration {
		DEFAULT_AWAIT_POLLING_INTERVAL
	}

	/// Stops accepting submissions and cancels the task running on this node, waiting for the
	/// cancellation to be acknowledged.
	async fn stop(&self);
}
