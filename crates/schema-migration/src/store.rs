use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{error::MigrationError, version::SchemaVersion};

/// Where the version of the persisted schema is kept.
#[async_trait]
pub trait SchemaVersionStore: Send + Sync + fmt::Debug + 'static {
	/// `None` when no version was ever recorded.
	async fn current_version(&self) -> Result<Option<SchemaVersion>, MigrationError>;

	async fn update_version(&self, version: SchemaVersion) -> Result<(), MigrationError>;
}

#[derive(Debug, Default)]
pub struct MemorySchemaVersionStore {
	version: RwLock<Option<SchemaVersion>>,
}

impl MemorySchemaVersionStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_version(version: SchemaVersion) -> Self {
		Self {
			version: RwLock::new(Some(version)),
		}
	}
}

#[async_trait]
impl SchemaVersionStore for MemorySchemaVersionStore {
	async fn current_version(&self) -> Result<Option<SchemaVersion>, MigrationError> {
		Ok(*self.version.read().await)
	}

	async fn update_version(&self, version: SchemaVersion) -> Result<(), MigrationError> {
		*self.version.write().await = Some(version);

		Ok(())
	}
}
