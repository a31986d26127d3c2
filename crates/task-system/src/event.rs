use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
	details::{Hostname, TaskExecutionDetails},
	task::{AdditionalInformation, TaskId, TaskResult, TaskType},
};

/// Position of an event in its task history, starting at zero with the creation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(u32);

impl EventId {
	pub const FIRST: Self = Self(0);

	#[must_use]
	pub const fn next(self) -> Self {
		Self(self.0 + 1)
	}

	#[must_use]
	pub const fn value(self) -> u32 {
		self.0
	}
}

impl fmt::Display for EventId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A lifecycle fact about one task.
#[derive(Debug, Clone)]
pub struct TaskEvent {
	pub aggregate: TaskId,
	pub event_id: EventId,
	pub timestamp: DateTime<Utc>,
	pub kind: TaskEventKind,
}

#[derive(Debug, Clone)]
pub enum TaskEventKind {
	Created {
		task_type: TaskType,
		/// The registry encoded task, so any node can rebuild it
		task: Value,
		hostname: Hostname,
	},
	Started {
		hostname: Hostname,
	},
	CancelRequested {
		hostname: Hostname,
	},
	Updated {
		/// `None` when a stored snapshot could not be decoded anymore
		information: Option<Arc<dyn AdditionalInformation>>,
	},
	Completed {
		result: TaskResult,
		information: Option<Arc<dyn AdditionalInformation>>,
	},
	Failed {
		information: Option<Arc<dyn AdditionalInformation>>,
		error_message: Option<String>,
		exception: Option<String>,
	},
	Cancelled {
		information: Option<Arc<dyn AdditionalInformation>>,
	},
}

impl TaskEventKind {
	#[must_use]
	pub const fn name(&self) -> &'static str {
		match self {
			Self::Created { .. } => "created",
			Self::Started { .. } => "started",
			Self::CancelRequested { .. } => "cancel-requested",
			Self::Updated { .. } => "updated",
			Self::Completed { .. } => "completed",
			Self::Failed { .. } => "failed",
			Self::Cancelled { .. } => "cancelled",
		}
	}

	/// Applies this event to the details of `task_id`, returns whether the state machine
	/// accepted it. A creation event is only accepted on a task without details yet.
	pub fn apply(
		&self,
		task_id: TaskId,
		details: &mut Option<TaskExecutionDetails>,
		at: DateTime<Utc>,
	) -> bool {
		let details = match (self, details.as_mut()) {
			(
				Self::Created {
					task_type,
					hostname,
					..
				},
				None,
			) => {
				*details = Some(TaskExecutionDetails::new(
					task_id,
					task_type.clone(),
					hostname.clone(),
					at,
				));
				return true;
			}
			(Self::Created { .. }, Some(_)) | (_, None) => return false,
			(_, Some(details)) => details,
		};

		match self {
			Self::Created { .. } => false,
			Self::Started { hostname } => details.start(hostname.clone(), at),
			Self::CancelRequested { hostname } => details.request_cancel(hostname.clone(), at),
			Self::Updated { information } => information
				.as_ref()
				.is_some_and(|information| details.update_information(Arc::clone(information))),
			Self::Completed {
				result,
				information,
			} => details.complete(*result, information.clone(), at),
			Self::Failed {
				information,
				error_message,
				exception,
			} => details.fail(
				information.clone(),
				error_message.clone(),
				exception.clone(),
				at,
			),
			Self::Cancelled { information } => details.cancel_effectively(information.clone(), at),
		}
	}
}

impl TaskEvent {
	pub fn apply_to(&self, details: &mut Option<TaskExecutionDetails>) -> bool {
		self.kind.apply(self.aggregate, details, self.timestamp)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::details::Status;

	use uuid::Uuid;

	fn event(aggregate: TaskId, event_id: EventId, kind: TaskEventKind) -> TaskEvent {
		TaskEvent {
			aggregate,
			event_id,
			timestamp: Utc::now(),
			kind,
		}
	}

	#[test]
	fn folding_a_history_rebuilds_details() {
		let id = Uuid::new_v4();
		let history = [
			TaskEventKind::Created {
				task_type: TaskType::of("memory-test"),
				task: serde_json::json!({ "type": "memory-test" }),
				hostname: Hostname::new("foo"),
			},
			TaskEventKind::Started {
				hostname: Hostname::new("bar"),
			},
			TaskEventKind::Updated {
				information: Some(Arc::new(3_u64)),
			},
			TaskEventKind::Completed {
				result: TaskResult::Completed,
				information: None,
			},
		];

		let mut details = None;
		let mut event_id = EventId::FIRST;
		for kind in history {
			assert!(event(id, event_id, kind).apply_to(&mut details));
			event_id = event_id.next();
		}

		let details = details.unwrap();
		assert_eq!(details.status, Status::Completed);
		assert_eq!(details.submitted_node, Hostname::new("foo"));
		assert_eq!(details.ran_node, Some(Hostname::new("bar")));
		assert_eq!(
			details
				.additional_information
				.and_then(|info| info.downcast_arc::<u64>().ok())
				.as_deref(),
			Some(&3)
		);
	}

	#[test]
	fn events_before_creation_are_refused() {
		let mut details = None;

		assert!(!event(
			Uuid::new_v4(),
			EventId::FIRST,
			TaskEventKind::Started {
				hostname: Hostname::new("foo")
			}
		)
		.apply_to(&mut details));
		assert!(details.is_none());
	}
}
