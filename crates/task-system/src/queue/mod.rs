use async_trait::async_trait;

use super::{
	error::Error,
	task::{TaskId, TaskWithId},
};

mod broker;
mod memory;

pub use broker::{BrokerWorkQueue, TASK_ID_HEADER};
pub use memory::MemoryWorkQueue;

/// Delivers submitted tasks to a [`Worker`](crate::Worker), in submission order and one at a time.
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
	async fn submit(&self, task: TaskWithId) -> Result<(), Error>;

	/// Forwards a cancellation to the worker that has, or will get, the task.
	async fn cancel(&self, task_id: TaskId) -> Result<(), Error>;

	/// Stops delivering tasks and closes the worker, cancelling the running task.
	async fn close(&self);
}
