//! JSON representation of [`TaskEvent`]s in a journal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
	details::Hostname,
	event::{EventId, TaskEvent, TaskEventKind},
	registry::{task_type_of, TaskRegistry},
	task::{AdditionalInformation, TaskId, TaskResult, TaskType},
};

use super::JournalError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum EventRecord {
	#[serde(rename = "task-manager-created", rename_all = "camelCase")]
	Created {
		aggregate: TaskId,
		event: EventId,
		timestamp: DateTime<Utc>,
		task: Value,
		hostname: Hostname,
	},
	#[serde(rename = "task-manager-started", rename_all = "camelCase")]
	Started {
		aggregate: TaskId,
		event: EventId,
		timestamp: DateTime<Utc>,
		hostname: Hostname,
	},
	#[serde(rename = "task-manager-cancel-requested", rename_all = "camelCase")]
	CancelRequested {
		aggregate: TaskId,
		event: EventId,
		timestamp: DateTime<Utc>,
		hostname: Hostname,
	},
	#[serde(rename = "task-manager-updated", rename_all = "camelCase")]
	Updated {
		aggregate: TaskId,
		event: EventId,
		timestamp: DateTime<Utc>,
		additional_information: Value,
	},
	#[serde(rename = "task-manager-completed", rename_all = "camelCase")]
	Completed {
		aggregate: TaskId,
		event: EventId,
		timestamp: DateTime<Utc>,
		result: TaskResult,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		additional_information: Option<Value>,
	},
	#[serde(rename = "task-manager-failed", rename_all = "camelCase")]
	Failed {
		aggregate: TaskId,
		event: EventId,
		timestamp: DateTime<Utc>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		additional_information: Option<Value>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error_message: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		exception: Option<String>,
	},
	#[serde(rename = "task-manager-cancelled", rename_all = "camelCase")]
	Cancelled {
		aggregate: TaskId,
		event: EventId,
		timestamp: DateTime<Utc>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		additional_information: Option<Value>,
	},
}

/// Converts events to and from journal records, task payloads and additional information go
/// through the [`TaskRegistry`].
#[derive(Debug, Clone)]
pub struct EventCodec {
	registry: Arc<TaskRegistry>,
}

impl EventCodec {
	pub const fn new(registry: Arc<TaskRegistry>) -> Self {
		Self { registry }
	}

	#[must_use]
	pub fn registry(&self) -> &TaskRegistry {
		&self.registry
	}

	/// `task_type` is the type of the aggregate, additional information is registered under it.
	pub fn encode(&self, task_type: &TaskType, event: &TaskEvent) -> Result<Value, JournalError> {
		let TaskEvent {
			aggregate,
			event_id: event,
			timestamp,
			kind,
		} = event;
		let (aggregate, event, timestamp) = (*aggregate, *event, *timestamp);

		// The lifecycle is recorded even when the snapshot can't be
		let information = |information: &Option<Arc<dyn AdditionalInformation>>| {
			information
				.as_deref()
				.and_then(|information| self.encode_information(aggregate, task_type, information))
		};

		let record = match kind {
			TaskEventKind::Created { task, hostname, .. } => EventRecord::Created {
				aggregate,
				event,
				timestamp,
				task: task.clone(),
				hostname: hostname.clone(),
			},
			TaskEventKind::Started { hostname } => EventRecord::Started {
				aggregate,
				event,
				timestamp,
				hostname: hostname.clone(),
			},
			TaskEventKind::CancelRequested { hostname } => EventRecord::CancelRequested {
				aggregate,
				event,
				timestamp,
				hostname: hostname.clone(),
			},
			TaskEventKind::Updated { information: None } => {
				return Err(JournalError::EmptyUpdate(aggregate));
			}
			TaskEventKind::Updated {
				information: Some(information),
			} => EventRecord::Updated {
				aggregate,
				event,
				timestamp,
				additional_information: self
					.encode_information(aggregate, task_type, information.as_ref())
					.ok_or(JournalError::EmptyUpdate(aggregate))?,
			},
			TaskEventKind::Completed {
				result,
				information: info,
			} => EventRecord::Completed {
				aggregate,
				event,
				timestamp,
				result: *result,
				additional_information: information(info),
			},
			TaskEventKind::Failed {
				information: info,
				error_message,
				exception,
			} => EventRecord::Failed {
				aggregate,
				event,
				timestamp,
				additional_information: information(info),
				error_message: error_message.clone(),
				exception: exception.clone(),
			},
			TaskEventKind::Cancelled { information: info } => EventRecord::Cancelled {
				aggregate,
				event,
				timestamp,
				additional_information: information(info),
			},
		};

		Ok(serde_json::to_value(record)?)
	}

	/// Undecodable additional information is dropped with a warning, the lifecycle itself is
	/// still replayed.
	pub fn decode(&self, value: Value) -> Result<TaskEvent, JournalError> {
		let (aggregate, event_id, timestamp, kind) = match serde_json::from_value(value)? {
			EventRecord::Created {
				aggregate,
				event,
				timestamp,
				task,
				hostname,
			} => (
				aggregate,
				event,
				timestamp,
				TaskEventKind::Created {
					task_type: task_type_of(&task)?,
					task,
					hostname,
				},
			),
			EventRecord::Started {
				aggregate,
				event,
				timestamp,
				hostname,
			} => (
				aggregate,
				event,
				timestamp,
				TaskEventKind::Started { hostname },
			),
			EventRecord::CancelRequested {
				aggregate,
				event,
				timestamp,
				hostname,
			} => (
				aggregate,
				event,
				timestamp,
				TaskEventKind::CancelRequested { hostname },
			),
			EventRecord::Updated {
				aggregate,
				event,
				timestamp,
				additional_information,
			} => (
				aggregate,
				event,
				timestamp,
				TaskEventKind::Updated {
					information: self.information(aggregate, Some(additional_information)),
				},
			),
			EventRecord::Completed {
				aggregate,
				event,
				timestamp,
				result,
				additional_information,
			} => (
				aggregate,
				event,
				timestamp,
				TaskEventKind::Completed {
					result,
					information: self.information(aggregate, additional_information),
				},
			),
			EventRecord::Failed {
				aggregate,
				event,
				timestamp,
				additional_information,
				error_message,
				exception,
			} => (
				aggregate,
				event,
				timestamp,
				TaskEventKind::Failed {
					information: self.information(aggregate, additional_information),
					error_message,
					exception,
				},
			),
			EventRecord::Cancelled {
				aggregate,
				event,
				timestamp,
				additional_information,
			} => (
				aggregate,
				event,
				timestamp,
				TaskEventKind::Cancelled {
					information: self.information(aggregate, additional_information),
				},
			),
		};

		Ok(TaskEvent {
			aggregate,
			event_id,
			timestamp,
			kind,
		})
	}

	fn encode_information(
		&self,
		aggregate: TaskId,
		task_type: &TaskType,
		information: &dyn AdditionalInformation,
	) -> Option<Value> {
		self.registry
			.encode_information(task_type, information)
			.map_err(|e| warn!(?e, %aggregate, "Dropping unencodable additional information"))
			.ok()
	}

	fn information(
		&self,
		aggregate: TaskId,
		value: Option<Value>,
	) -> Option<Arc<dyn AdditionalInformation>> {
		self.registry
			.decode_information(value?)
			.map_err(|e| warn!(?e, %aggregate, "Dropping undecodable additional information"))
			.ok()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use uuid::Uuid;

	use super::*;
	use crate::registry::InformationModule;

	const COUNTING: TaskType = TaskType::of("counting");

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Count {
		count: u64,
	}

	fn codec() -> EventCodec {
		EventCodec::new(Arc::new(
			TaskRegistry::new().with_information(InformationModule::serde::<Count>(COUNTING)),
		))
	}

	#[test]
	fn records_use_the_journal_format() {
		let aggregate = Uuid::new_v4();
		let timestamp = Utc::now();

		let value = codec()
			.encode(
				&COUNTING,
				&TaskEvent {
					aggregate,
					event_id: EventId::FIRST.next(),
					timestamp,
					kind: TaskEventKind::Completed {
						result: TaskResult::Partial,
						information: Some(Arc::new(Count { count: 3 })),
					},
				},
			)
			.unwrap();

		assert_eq!(
			value,
			json!({
				"type": "task-manager-completed",
				"aggregate": aggregate,
				"event": 1,
				"timestamp": timestamp,
				"result": "PARTIAL",
				"additionalInformation": { "type": "counting", "count": 3 },
			})
		);

		let event = codec().decode(value).unwrap();
		assert_eq!(event.event_id, EventId::FIRST.next());
		assert!(matches!(
			event.kind,
			TaskEventKind::Completed { result: TaskResult::Partial, information: Some(info) }
				if info.downcast_ref::<Count>() == Some(&Count { count: 3 })
		));
	}

	#[test]
	fn creation_records_carry_the_task_type_in_the_payload() {
		let aggregate = Uuid::new_v4();

		let event = codec()
			.decode(json!({
				"type": "task-manager-created",
				"aggregate": aggregate,
				"event": 0,
				"timestamp": Utc::now(),
				"task": { "type": "counting", "limit": 10 },
				"hostname": "foo",
			}))
			.unwrap();

		assert!(matches!(
			event.kind,
			TaskEventKind::Created { task_type, hostname, .. }
				if task_type == COUNTING && hostname == Hostname::new("foo")
		));
	}

	#[test]
	fn undecodable_information_is_dropped() {
		let event = codec()
			.decode(json!({
				"type": "task-manager-cancelled",
				"aggregate": Uuid::new_v4(),
				"event": 2,
				"timestamp": Utc::now(),
				"additionalInformation": { "type": "unknown" },
			}))
			.unwrap();

		assert!(matches!(
			event.kind,
			TaskEventKind::Cancelled { information: None }
		));
	}

	#[test]
	fn unencodable_information_does_not_block_the_lifecycle() {
		let aggregate = Uuid::new_v4();
		let unregistered = TaskType::of("unregistered");
		let event = |kind| TaskEvent {
			aggregate,
			event_id: EventId::FIRST.next(),
			timestamp: Utc::now(),
			kind,
		};

		let value = codec()
			.encode(
				&unregistered,
				&event(TaskEventKind::Completed {
					result: TaskResult::Completed,
					information: Some(Arc::new(7_u64)),
				}),
			)
			.unwrap();
		assert_eq!(value["type"], "task-manager-completed");
		assert!(value.get("additionalInformation").is_none());

		// Wrong concrete type for a registered task type
		let value = codec()
			.encode(
				&COUNTING,
				&event(TaskEventKind::Failed {
					information: Some(Arc::new("not a count")),
					error_message: Some("mailbox is gone".to_string()),
					exception: None,
				}),
			)
			.unwrap();
		assert_eq!(value["type"], "task-manager-failed");
		assert!(value.get("additionalInformation").is_none());

		// An update has nothing left to record
		assert!(matches!(
			codec().encode(
				&unregistered,
				&event(TaskEventKind::Updated {
					information: Some(Arc::new(7_u64)),
				}),
			),
			Err(JournalError::EmptyUpdate(id)) if id == aggregate
		));
	}

	#[test]
	fn unknown_records_are_errors() {
		assert!(matches!(
			codec().decode(json!({ "type": "task-manager-exploded" })),
			Err(JournalError::Record(_))
		));
	}
}
