use mail_task_system::{Interrupter, RunError, TaskResult};

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{
	error::MigrationError,
	store::SchemaVersionStore,
	task::MigrationTask,
	version::{SchemaTransition, SchemaVersion},
};

/// One registered schema upgrade step.
#[async_trait]
pub trait Migration: Send + Sync + 'static {
	async fn apply(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError>;
}

/// Plans schema upgrades, the upgrades themselves run as a [`MigrationTask`].
///
/// Cheap to clone, every clone shares the same store and migrations.
#[derive(Clone)]
pub struct MigrationService {
	store: Arc<dyn SchemaVersionStore>,
	migrations: Arc<HashMap<SchemaTransition, Arc<dyn Migration>>>,
	latest: SchemaVersion,
}

impl fmt::Debug for MigrationService {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut transitions = self.migrations.keys().copied().collect::<Vec<_>>();
		transitions.sort_by_key(|transition| transition.to);

		f.debug_struct("MigrationService")
			.field("store", &self.store)
			.field("transitions", &transitions)
			.field("latest", &self.latest)
			.finish()
	}
}

impl MigrationService {
	pub fn new(store: Arc<dyn SchemaVersionStore>, latest: SchemaVersion) -> Self {
		Self {
			store,
			migrations: Arc::default(),
			latest,
		}
	}

	#[must_use]
	pub fn with_migration(mut self, transition: SchemaTransition, migration: impl Migration) -> Self {
		Arc::make_mut(&mut self.migrations).insert(transition, Arc::new(migration));
		self
	}

	pub async fn current_version(&self) -> Result<SchemaVersion, MigrationError> {
		Ok(self
			.store
			.current_version()
			.await?
			.unwrap_or(SchemaVersion::INITIAL))
	}

	#[must_use]
	pub const fn latest_version(&self) -> SchemaVersion {
		self.latest
	}

	/// Builds the task upgrading the schema to `target`.
	///
	/// Every transition on the way must have a registered migration, otherwise this fails right
	/// away and nothing is applied.
	#[instrument(skip(self), err)]
	pub async fn upgrade_to_version(
		&self,
		target: SchemaVersion,
	) -> Result<MigrationTask, MigrationError> {
		let current = self.current_version().await?;

		if let Some(missing) =
			SchemaTransition::path(current, target).find(|transition| self.migration(*transition).is_none())
		{
			return Err(MigrationError::MissingTransition(missing));
		}

		debug!(%current, "Schema upgrade planned");

		Ok(MigrationTask::new(self.clone(), target))
	}

	pub async fn upgrade_to_latest_version(&self) -> Result<MigrationTask, MigrationError> {
		self.upgrade_to_version(self.latest).await
	}

	pub(crate) fn migration(&self, transition: SchemaTransition) -> Option<Arc<dyn Migration>> {
		self.migrations.get(&transition).cloned()
	}

	pub(crate) async fn persist_version(&self, version: SchemaVersion) -> Result<(), MigrationError> {
		self.store.update_version(version).await
	}
}
