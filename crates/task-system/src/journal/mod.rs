//! Event sourced task state, shared by every node of a cluster.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use super::{error::Error, event::TaskEventKind, registry::RegistryError, task::TaskId};

mod aggregate;
mod memory;
mod record;

pub use aggregate::TaskAggregate;
pub use memory::MemoryEventJournal;
pub use record::EventCodec;

/// How many times a command is retried when another node appended to the same task history
/// in between.
const MAX_APPEND_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum JournalError {
	#[error(
		"conflicting append on task <id='{aggregate}'>: expected {expected} events, found {actual}"
	)]
	Conflict {
		aggregate: TaskId,
		expected: usize,
		actual: usize,
	},
	#[error("additional information update without information on task <id='{0}'>")]
	EmptyUpdate(TaskId),
	#[error("invalid journal record: {0}")]
	Record(#[from] serde_json::Error),
	#[error(transparent)]
	Registry(#[from] RegistryError),
	#[error("journal storage failure: {0}")]
	Storage(String),
}

/// Durable storage of task histories.
///
/// Appends are optimistic: the writer states how many records it based its decision on, and the
/// append fails with [`JournalError::Conflict`] if the history grew in the meantime.
#[async_trait]
pub trait EventJournal: Send + Sync + fmt::Debug + 'static {
	async fn append(
		&self,
		aggregate: TaskId,
		expected_len: usize,
		records: Vec<Value>,
	) -> Result<(), JournalError>;

	/// The records of one task history, in append order.
	async fn load(&self, aggregate: TaskId) -> Result<Vec<Value>, JournalError>;

	/// Every task with a history, in creation order.
	async fn aggregates(&self) -> Result<Vec<TaskId>, JournalError>;
}

/// Runs commands against task aggregates stored in an [`EventJournal`].
#[derive(Debug, Clone)]
pub struct EventStore {
	journal: Arc<dyn EventJournal>,
	codec: EventCodec,
}

impl EventStore {
	pub const fn new(journal: Arc<dyn EventJournal>, codec: EventCodec) -> Self {
		Self { journal, codec }
	}

	#[must_use]
	pub const fn codec(&self) -> &EventCodec {
		&self.codec
	}

	pub async fn load(&self, aggregate: TaskId) -> Result<TaskAggregate, JournalError> {
		let history = self
			.journal
			.load(aggregate)
			.await?
			.into_iter()
			.map(|record| self.codec.decode(record))
			.collect::<Result<Vec<_>, _>>()?;

		Ok(TaskAggregate::load(aggregate, history))
	}

	pub async fn aggregates(&self) -> Result<Vec<TaskId>, JournalError> {
		self.journal.aggregates().await
	}

	/// Decides an event with `command` on the latest state of `aggregate` and appends it.
	///
	/// Returns whether an event was appended, `command` returning `None` or the state machine
	/// refusing the event is not an error. Conflicting appends are retried on fresh state.
	pub async fn dispatch(
		&self,
		aggregate: TaskId,
		command: impl Fn(&TaskAggregate) -> Option<TaskEventKind> + Send + Sync,
	) -> Result<bool, Error> {
		for attempt in 1..=MAX_APPEND_ATTEMPTS {
			let state = self.load(aggregate).await?;

			let Some(kind) = command(&state) else {
				return Ok(false);
			};

			let Some((task_type, event)) = state.decide(kind, Utc::now()) else {
				return Ok(false);
			};

			let record = self.codec.encode(&task_type, &event)?;

			match self
				.journal
				.append(aggregate, state.version(), vec![record])
				.await
			{
				Ok(()) => {
					trace!(%aggregate, event_id = %event.event_id, kind = event.kind.name(), "Appended task event");
					return Ok(true);
				}
				Err(JournalError::Conflict { .. }) => {
					debug!(%aggregate, attempt, "Concurrent append on task history, retrying");
				}
				Err(e) => return Err(e.into()),
			}
		}

		Err(Error::ConcurrentModification(aggregate))
	}
}
