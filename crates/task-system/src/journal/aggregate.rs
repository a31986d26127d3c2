use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
	details::TaskExecutionDetails,
	event::{EventId, TaskEvent, TaskEventKind},
	task::{TaskId, TaskType},
};

/// The state of one task rebuilt from its history.
#[derive(Debug, Clone)]
pub struct TaskAggregate {
	id: TaskId,
	version: usize,
	next_event_id: EventId,
	details: Option<TaskExecutionDetails>,
}

impl TaskAggregate {
	pub fn load(id: TaskId, history: Vec<TaskEvent>) -> Self {
		let mut details = None;
		let mut next_event_id = EventId::FIRST;
		let version = history.len();

		for event in history {
			if event.aggregate != id {
				warn!(
					task_id = %id,
					aggregate = %event.aggregate,
					"Skipping event of another task found in task history"
				);
				continue;
			}

			// Refused events were never decided by a writer, applying is idempotent anyway
			event.apply_to(&mut details);
			next_event_id = next_event_id.max(event.event_id.next());
		}

		Self {
			id,
			version,
			next_event_id,
			details,
		}
	}

	#[must_use]
	pub const fn id(&self) -> TaskId {
		self.id
	}

	/// Number of records the state was rebuilt from.
	#[must_use]
	pub const fn version(&self) -> usize {
		self.version
	}

	#[must_use]
	pub const fn details(&self) -> Option<&TaskExecutionDetails> {
		self.details.as_ref()
	}

	#[must_use]
	pub fn into_details(self) -> Option<TaskExecutionDetails> {
		self.details
	}

	/// The event to append for `kind`, or `None` when the state machine refuses it. The type of
	/// the task is returned alongside, to encode the event.
	#[must_use]
	pub fn decide(&self, kind: TaskEventKind, at: DateTime<Utc>) -> Option<(TaskType, TaskEvent)> {
		let event = TaskEvent {
			aggregate: self.id,
			event_id: self.next_event_id,
			timestamp: at,
			kind,
		};

		let mut details = self.details.clone();
		if !event.apply_to(&mut details) {
			return None;
		}

		details.map(|details| (details.task_type, event))
	}
}
