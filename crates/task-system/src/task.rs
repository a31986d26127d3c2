use std::{borrow::Cow, error::Error as StdError, fmt, iter, sync::Arc};

use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::interrupter::{Interrupted, Interrupter};

/// A unique identifier for a submitted task using the [`uuid`](https://docs.rs/uuid) crate.
///
/// It is assigned by the task manager at submission time and correlates the work queue,
/// the event journal and every status lookup.
pub type TaskId = Uuid;

/// Stable discriminator of a task kind, used to dispatch serialization across the cluster.
///
/// The same tag must be used when encoding and decoding a task, so it should never change
/// once tasks of that kind were submitted to a shared queue or journal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(Cow<'static, str>);

impl TaskType {
	#[must_use]
	pub const fn of(name: &'static str) -> Self {
		Self(Cow::Borrowed(name))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<String> for TaskType {
	fn from(name: String) -> Self {
		Self(Cow::Owned(name))
	}
}

impl fmt::Display for TaskType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// The outcome of a task that ran to its end.
///
/// `Partial` means the task went through all of its work but hit recoverable problems worth
/// surfacing to an operator, which is not the same thing as failing to run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResult {
	Completed,
	Partial,
}

impl TaskResult {
	/// Merges the results of two sub-steps, a single partial step makes the whole partial.
	#[must_use]
	pub const fn combine(self, other: Self) -> Self {
		match (self, other) {
			(Self::Completed, Self::Completed) => Self::Completed,
			_ => Self::Partial,
		}
	}

	#[must_use]
	pub const fn is_completed(self) -> bool {
		matches!(self, Self::Completed)
	}
}

impl FromIterator<Self> for TaskResult {
	fn from_iter<I: IntoIterator<Item = Self>>(iter: I) -> Self {
		iter.into_iter().fold(Self::Completed, Self::combine)
	}
}

/// The error a task body can return.
#[derive(Debug, Error)]
pub enum RunError {
	#[error(transparent)]
	Interrupted(#[from] Interrupted),
	#[error(transparent)]
	Other(Box<dyn StdError + Send + Sync>),
}

impl RunError {
	pub fn other(e: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
		Self::Other(e.into())
	}

	/// Whether an [`Interrupted`] error shows up anywhere in this error's cause chain.
	///
	/// Such outcomes are accounted as cancellations, never as failures.
	#[must_use]
	pub fn is_interruption(&self) -> bool {
		let root: &(dyn StdError + 'static) = match self {
			Self::Interrupted(_) => return true,
			Self::Other(e) => e.as_ref(),
		};

		iter::successors(Some(root), |&e| e.source()).any(|e| e.is::<Interrupted>())
	}

	/// Renders the whole cause chain, used to record the failure on the task details.
	#[must_use]
	pub fn render_chain(&self) -> String {
		let root: &(dyn StdError + 'static) = match self {
			Self::Interrupted(e) => e,
			Self::Other(e) => e.as_ref(),
		};

		iter::successors(Some(root), |&e| e.source())
			.map(ToString::to_string)
			.collect::<Vec<_>>()
			.join(": ")
	}
}

/// A snapshot a task can report about itself while it runs, like processed item counters.
///
/// Users downcast it back to the concrete type the task reports.
pub trait AdditionalInformation: DowncastSync + fmt::Debug {}

impl_downcast!(sync AdditionalInformation);

/// Blanket implementation for all sendable debuggable types
impl<T: fmt::Debug + Send + Sync + 'static> AdditionalInformation for T {}

/// The main trait that represents a unit of long-running work submitted to a task manager.
///
/// `run` receives `&self` because the worker samples [`Task::details`] concurrently while the
/// body is in flight, so progress counters are expected to use interior mutability.
///
/// We're currently using the [`async_trait`](https://docs.rs/async-trait) crate to allow dyn async traits,
/// due to a limitation in the Rust language.
#[async_trait]
pub trait Task: DowncastSync {
	/// The stable tag of this task kind, see [`TaskType`].
	fn task_type(&self) -> TaskType;

	/// The work itself. The [`interrupter`](Interrupter) tells the body when a cancellation was
	/// requested, so it can stop at a safe point returning [`Interrupted`].
	async fn run(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError>;

	/// An optional snapshot of the task progress, it can be read at any time from another thread.
	fn details(&self) -> Option<Arc<dyn AdditionalInformation>> {
		None
	}
}

impl_downcast!(sync Task);

impl fmt::Debug for dyn Task {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<Task type='{}'>", self.task_type())
	}
}

/// A helper trait to convert any type that implements [`Task`] into a shared trait object.
pub trait IntoTask {
	fn into_task(self) -> Arc<dyn Task>;
}

/// Blanket implementation for all types that implements [`Task`]
impl<T: Task> IntoTask for T {
	fn into_task(self) -> Arc<dyn Task> {
		Arc::new(self)
	}
}

impl IntoTask for Arc<dyn Task> {
	fn into_task(self) -> Arc<dyn Task> {
		self
	}
}

/// A task paired with the identifier it was submitted under.
#[derive(Debug, Clone)]
pub struct TaskWithId {
	pub id: TaskId,
	pub task: Arc<dyn Task>,
}

impl TaskWithId {
	pub fn new(id: TaskId, task: impl IntoTask) -> Self {
		Self {
			id,
			task: task.into_task(),
		}
	}

	#[inline]
	#[must_use]
	pub fn task_type(&self) -> TaskType {
		self.task.task_type()
	}
}
