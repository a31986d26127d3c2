use mail_task_system::{
	check_interruption, AdditionalInformation, InformationModule, Interrupter, RunError, Task,
	TaskModule, TaskResult, TaskType,
};

use std::{
	fmt,
	sync::{
		atomic::{AtomicU32, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{
	error::MigrationError,
	service::MigrationService,
	version::{SchemaTransition, SchemaVersion},
};

/// What a running migration reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationInformation {
	pub target_version: SchemaVersion,
	/// The version the schema is known to be at, `None` before the first read
	pub reached_version: Option<SchemaVersion>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MigrationTaskDto {
	target_version: SchemaVersion,
}

/// Upgrades the schema to a target version, one transition at a time.
///
/// The stored version is read again before every step, so running the task twice, or after a
/// crash, only applies what's still missing.
pub struct MigrationTask {
	service: MigrationService,
	target: SchemaVersion,
	reached: AtomicU32,
}

impl fmt::Debug for MigrationTask {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MigrationTask")
			.field("target", &self.target)
			.field("reached", &self.reached)
			.finish_non_exhaustive()
	}
}

impl MigrationTask {
	pub const TYPE: TaskType = TaskType::of("schema-migration");

	pub(crate) const fn new(service: MigrationService, target: SchemaVersion) -> Self {
		Self {
			service,
			target,
			reached: AtomicU32::new(0),
		}
	}

	#[must_use]
	pub const fn target_version(&self) -> SchemaVersion {
		self.target
	}

	/// The registry module of migration tasks, decoded tasks run against `service`.
	pub fn module(service: MigrationService) -> TaskModule {
		TaskModule::new(
			Self::TYPE,
			|task: &Self| MigrationTaskDto {
				target_version: task.target,
			},
			move |dto: MigrationTaskDto| Self::new(service.clone(), dto.target_version),
		)
	}

	pub fn information_module() -> InformationModule {
		InformationModule::serde::<MigrationInformation>(Self::TYPE)
	}

	fn reach(&self, version: SchemaVersion) {
		self.reached.store(version.value(), Ordering::Relaxed);
	}

	async fn apply(
		&self,
		transition: SchemaTransition,
		interrupter: &Interrupter,
	) -> Result<(), RunError> {
		let migration = self
			.service
			.migration(transition)
			.ok_or(MigrationError::MissingTransition(transition))
			.map_err(RunError::other)?;

		info!(%transition, "Applying schema migration");

		match migration.apply(interrupter).await {
			Ok(TaskResult::Completed) => {
				self.service
					.persist_version(transition.to)
					.await
					.map_err(RunError::other)?;
				self.reach(transition.to);

				Ok(())
			}
			Ok(TaskResult::Partial) => {
				warn!(%transition, "Schema migration only partially succeeded, stopping");

				Err(RunError::other(MigrationError::Partial {
					transition,
					reached: transition.from,
				}))
			}
			// Kept as is, so the task is accounted as cancelled
			Err(e) if e.is_interruption() => Err(e),
			Err(e) => Err(RunError::other(MigrationError::Failed {
				transition,
				source: e,
			})),
		}
	}
}

#[async_trait]
impl Task for MigrationTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	#[instrument(skip_all, fields(target = %self.target))]
	async fn run(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		loop {
			check_interruption!(interrupter);

			let current = self
				.service
				.current_version()
				.await
				.map_err(RunError::other)?;
			self.reach(current);

			if current >= self.target {
				info!(%current, "Schema is up to date");
				return Ok(TaskResult::Completed);
			}

			self.apply(SchemaTransition::after(current), interrupter)
				.await?;
		}
	}

	fn details(&self) -> Option<Arc<dyn AdditionalInformation>> {
		let reached = self.reached.load(Ordering::Relaxed);

		Some(Arc::new(MigrationInformation {
			target_version: self.target,
			reached_version: (reached != 0).then_some(SchemaVersion::new(reached)),
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::store::MemorySchemaVersionStore;

	use serde_json::json;

	#[test]
	fn information_is_reported_in_camel_case() {
		let information = MigrationInformation {
			target_version: SchemaVersion::new(3),
			reached_version: Some(SchemaVersion::new(2)),
		};

		assert_eq!(
			serde_json::to_value(&information).unwrap(),
			json!({ "targetVersion": 3, "reachedVersion": 2 })
		);
	}

	#[test]
	fn nothing_is_reached_before_running() {
		let service = MigrationService::new(
			Arc::new(MemorySchemaVersionStore::new()),
			SchemaVersion::new(2),
		);
		let task = MigrationTask::new(service, SchemaVersion::new(2));

		let details = task.details().unwrap();
		let information = details.downcast_ref::<MigrationInformation>().unwrap();

		assert_eq!(information.target_version, SchemaVersion::new(2));
		assert_eq!(information.reached_version, None);
	}
}
