use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

use super::task::{AdditionalInformation, TaskId, TaskResult, TaskType};

/// The lifecycle status of a submitted task.
///
/// ```text
/// Waiting ──> InProgress ──> Completed | Failed
///    │            │
///    └────────────┴──> CancelRequested ──> Cancelled
/// ```
///
/// `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
	#[serde(rename = "waiting")]
	Waiting,
	#[serde(rename = "inProgress")]
	InProgress,
	#[serde(rename = "completed")]
	Completed,
	#[serde(rename = "failed")]
	Failed,
	#[serde(rename = "canceledRequested")]
	CancelRequested,
	#[serde(rename = "canceled")]
	Cancelled,
}

impl Status {
	pub const ALL: [Self; 6] = [
		Self::Waiting,
		Self::InProgress,
		Self::Completed,
		Self::Failed,
		Self::CancelRequested,
		Self::Cancelled,
	];

	#[must_use]
	pub const fn is_finished(self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Waiting => "waiting",
			Self::InProgress => "inProgress",
			Self::Completed => "completed",
			Self::Failed => "failed",
			Self::CancelRequested => "canceledRequested",
			Self::Cancelled => "canceled",
		}
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error)]
#[error("unknown task status: '{0}'")]
pub struct UnknownStatusError(pub String);

impl FromStr for Status {
	type Err = UnknownStatusError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|status| status.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| UnknownStatusError(s.to_string()))
	}
}

/// Identity of a node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hostname(String);

impl Hostname {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	/// The hostname of the machine we're running on.
	#[must_use]
	pub fn local() -> Self {
		hostname::get().map_or_else(
			|e| {
				warn!(?e, "Failed to resolve local hostname, falling back to localhost");
				Self::new("localhost")
			},
			|name| Self(name.to_string_lossy().into_owned()),
		)
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Hostname {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// The lifecycle record of one submitted task.
///
/// Every mutation goes through one of the transition methods below, which refuse (returning
/// `false`) anything the state machine doesn't allow, so the record can be safely rebuilt by
/// replaying events in any node.
#[derive(Debug, Clone)]
pub struct TaskExecutionDetails {
	pub task_id: TaskId,
	pub task_type: TaskType,
	pub status: Status,
	pub additional_information: Option<Arc<dyn AdditionalInformation>>,
	pub result: Option<TaskResult>,
	pub error_message: Option<String>,
	pub exception: Option<String>,

	pub submitted_node: Hostname,
	pub submitted_date: DateTime<Utc>,
	pub ran_node: Option<Hostname>,
	pub started_date: Option<DateTime<Utc>>,
	pub cancel_requested_node: Option<Hostname>,
	pub cancel_requested_date: Option<DateTime<Utc>>,
	pub completed_date: Option<DateTime<Utc>>,
	pub failed_date: Option<DateTime<Utc>>,
	pub cancelled_date: Option<DateTime<Utc>>,
}

impl fmt::Display for TaskExecutionDetails {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"Task <type='{}', id='{}'> {}",
			self.task_type, self.task_id, self.status
		)
	}
}

impl TaskExecutionDetails {
	#[must_use]
	pub const fn new(
		task_id: TaskId,
		task_type: TaskType,
		submitted_node: Hostname,
		submitted_date: DateTime<Utc>,
	) -> Self {
		Self {
			task_id,
			task_type,
			status: Status::Waiting,
			additional_information: None,
			result: None,
			error_message: None,
			exception: None,
			submitted_node,
			submitted_date,
			ran_node: None,
			started_date: None,
			cancel_requested_node: None,
			cancel_requested_date: None,
			completed_date: None,
			failed_date: None,
			cancelled_date: None,
		}
	}

	#[must_use]
	pub const fn is_finished(&self) -> bool {
		self.status.is_finished()
	}

	pub fn start(&mut self, node: Hostname, at: DateTime<Utc>) -> bool {
		match self.status {
			Status::Waiting => {
				self.status = Status::InProgress;
			}
			// A cancellation can be requested from another node right before the task gets
			// picked, we keep the cancellation status but still register who picked it
			Status::CancelRequested if self.started_date.is_none() => {}
			status => return self.refuse("start", status),
		}

		self.ran_node = Some(node);
		self.started_date = Some(at);

		true
	}

	pub fn request_cancel(&mut self, node: Hostname, at: DateTime<Utc>) -> bool {
		match self.status {
			Status::Waiting | Status::InProgress => {
				self.status = Status::CancelRequested;
				self.cancel_requested_node = Some(node);
				self.cancel_requested_date = Some(at);

				true
			}
			status => self.refuse("request cancel", status),
		}
	}

	pub fn update_information(&mut self, information: Arc<dyn AdditionalInformation>) -> bool {
		if self.is_finished() {
			return self.refuse("update information", self.status);
		}

		self.additional_information = Some(information);

		true
	}

	/// `result` being [`TaskResult::Partial`] leads to the `Failed` status, the result itself is
	/// kept on the details.
	pub fn complete(
		&mut self,
		result: TaskResult,
		information: Option<Arc<dyn AdditionalInformation>>,
		at: DateTime<Utc>,
	) -> bool {
		match self.status {
			Status::InProgress | Status::CancelRequested => {
				self.result = Some(result);
				self.set_final_information(information);

				if result.is_completed() {
					self.status = Status::Completed;
					self.completed_date = Some(at);
				} else {
					self.status = Status::Failed;
					self.failed_date = Some(at);
				}

				true
			}
			status => self.refuse("complete", status),
		}
	}

	pub fn fail(
		&mut self,
		information: Option<Arc<dyn AdditionalInformation>>,
		error_message: Option<String>,
		exception: Option<String>,
		at: DateTime<Utc>,
	) -> bool {
		match self.status {
			Status::InProgress | Status::CancelRequested => {
				self.status = Status::Failed;
				self.set_final_information(information);
				self.error_message = error_message;
				self.exception = exception;
				self.failed_date = Some(at);

				true
			}
			status => self.refuse("fail", status),
		}
	}

	pub fn cancel_effectively(
		&mut self,
		information: Option<Arc<dyn AdditionalInformation>>,
		at: DateTime<Utc>,
	) -> bool {
		match self.status {
			Status::Waiting | Status::InProgress | Status::CancelRequested => {
				self.status = Status::Cancelled;
				self.set_final_information(information);
				self.cancelled_date = Some(at);

				true
			}
			status => self.refuse("cancel", status),
		}
	}

	fn set_final_information(&mut self, information: Option<Arc<dyn AdditionalInformation>>) {
		if information.is_some() {
			self.additional_information = information;
		}
	}

	fn refuse(&self, transition: &str, status: Status) -> bool {
		trace!(
			task_id = %self.task_id,
			%status,
			transition,
			"Refusing invalid task status transition",
		);

		false
	}
}
