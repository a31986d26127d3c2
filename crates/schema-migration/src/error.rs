use mail_task_system::RunError;

use thiserror::Error;

use super::version::{SchemaTransition, SchemaVersion};

#[derive(Debug, Error)]
pub enum MigrationError {
	#[error("no migration registered for transition {0}")]
	MissingTransition(SchemaTransition),
	#[error(
		"migration {transition} only partially succeeded, schema stays at version {reached}; \
		 run the migration again to resume from there"
	)]
	Partial {
		transition: SchemaTransition,
		reached: SchemaVersion,
	},
	#[error("migration {transition} failed")]
	Failed {
		transition: SchemaTransition,
		#[source]
		source: RunError,
	},
	#[error("schema version store failure: {0}")]
	Store(String),
}
