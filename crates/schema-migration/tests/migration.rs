use mail_schema_migration::{
	MemorySchemaVersionStore, Migration, MigrationError, MigrationInformation, MigrationService,
	MigrationTask, SchemaTransition, SchemaVersion, SchemaVersionStore,
};
use mail_task_system::{
	Config, EventJournal, EventSourcingTaskManager, Hostname, Interrupter, IntoTask, MemoryBroker,
	MemoryEventJournal, MemoryTaskManager, RunError, Status, TaskExecutionDetails, TaskManager,
	TaskRegistry, TaskResult, WorkerConfig,
};

use std::{
	future,
	sync::{Arc, Mutex},
	time::Duration,
};

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing_test::traced_test;

const AWAIT_TIMEOUT: Duration = Duration::from_secs(30);

fn config() -> Config {
	Config {
		worker: WorkerConfig {
			additional_information_polling_interval: Duration::from_millis(20),
			cancellation_grace_period: Duration::from_millis(100),
			shutdown_timeout: Duration::from_secs(2),
			..WorkerConfig::default()
		},
		await_polling_interval: Duration::from_millis(10),
		..Config::default()
	}
}

type Log = Arc<Mutex<Vec<SchemaTransition>>>;

/// Records every transition it is applied for.
#[derive(Debug)]
struct RecordingMigration {
	transition: SchemaTransition,
	log: Log,
}

#[async_trait]
impl Migration for RecordingMigration {
	async fn apply(&self, _: &Interrupter) -> Result<TaskResult, RunError> {
		self.log.lock().unwrap().push(self.transition);
		Ok(TaskResult::Completed)
	}
}

#[derive(Debug)]
struct PartialMigration;

#[async_trait]
impl Migration for PartialMigration {
	async fn apply(&self, _: &Interrupter) -> Result<TaskResult, RunError> {
		Ok(TaskResult::Partial)
	}
}

/// Never ends on its own.
#[derive(Debug)]
struct BlockingMigration;

#[async_trait]
impl Migration for BlockingMigration {
	async fn apply(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		interrupter
			.run_until_interrupted(future::pending::<()>())
			.await?;

		Ok(TaskResult::Completed)
	}
}

fn recording(log: &Log, to: u32) -> (SchemaTransition, RecordingMigration) {
	let transition = SchemaTransition::to(SchemaVersion::new(to));

	(
		transition,
		RecordingMigration {
			transition,
			log: Arc::clone(log),
		},
	)
}

fn service(store: &Arc<MemorySchemaVersionStore>, log: &Log) -> MigrationService {
	let (two, to_two) = recording(log, 2);
	let (three, to_three) = recording(log, 3);

	MigrationService::new(
		Arc::clone(store) as Arc<dyn SchemaVersionStore>,
		SchemaVersion::new(3),
	)
	.with_migration(two, to_two)
	.with_migration(three, to_three)
}

fn information(details: &TaskExecutionDetails) -> MigrationInformation {
	details
		.additional_information
		.as_ref()
		.and_then(|info| info.downcast_ref::<MigrationInformation>())
		.cloned()
		.expect("migration information is always reported")
}

async fn stored_version(store: &MemorySchemaVersionStore) -> Option<SchemaVersion> {
	store.current_version().await.unwrap()
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn upgrades_through_every_version() {
	let store = Arc::new(MemorySchemaVersionStore::new());
	let log = Log::default();
	let service = service(&store, &log);
	let manager = MemoryTaskManager::new(Hostname::new("foo"), config());

	assert_eq!(service.current_version().await.unwrap(), SchemaVersion::INITIAL);
	assert_eq!(service.latest_version(), SchemaVersion::new(3));

	let task = service.upgrade_to_latest_version().await.unwrap();
	assert_eq!(task.target_version(), SchemaVersion::new(3));

	let task_id = manager.submit(task.into_task()).await.unwrap();
	let details = manager.await_task(task_id, AWAIT_TIMEOUT).await.unwrap();

	assert_eq!(details.status, Status::Completed);
	assert_eq!(details.task_type, MigrationTask::TYPE);
	assert_eq!(
		information(&details),
		MigrationInformation {
			target_version: SchemaVersion::new(3),
			reached_version: Some(SchemaVersion::new(3)),
		}
	);
	assert_eq!(stored_version(&store).await, Some(SchemaVersion::new(3)));
	assert_eq!(
		*log.lock().unwrap(),
		vec![
			SchemaTransition::to(SchemaVersion::new(2)),
			SchemaTransition::to(SchemaVersion::new(3)),
		]
	);

	manager.stop().await;
}

#[tokio::test]
#[traced_test]
async fn missing_transition_is_refused_up_front() {
	let store = Arc::new(MemorySchemaVersionStore::new());
	let log = Log::default();
	let service = service(&store, &log);

	assert!(matches!(
		service.upgrade_to_version(SchemaVersion::new(4)).await,
		Err(MigrationError::MissingTransition(transition))
			if transition == SchemaTransition::to(SchemaVersion::new(4))
	));

	assert_eq!(stored_version(&store).await, None);
	assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn upgrade_resumes_from_the_stored_version() {
	let store = Arc::new(MemorySchemaVersionStore::with_version(SchemaVersion::new(2)));
	let log = Log::default();
	let manager = MemoryTaskManager::new(Hostname::new("foo"), config());

	// No 1 -> 2 migration at all, it was applied some time ago
	let (three, to_three) = recording(&log, 3);
	let service = MigrationService::new(
		Arc::clone(&store) as Arc<dyn SchemaVersionStore>,
		SchemaVersion::new(3),
	)
	.with_migration(three, to_three);

	let task = service.upgrade_to_latest_version().await.unwrap();
	let task_id = manager.submit(task.into_task()).await.unwrap();
	let details = manager.await_task(task_id, AWAIT_TIMEOUT).await.unwrap();

	assert_eq!(details.status, Status::Completed);
	assert_eq!(stored_version(&store).await, Some(SchemaVersion::new(3)));
	assert_eq!(*log.lock().unwrap(), vec![three]);

	// Running it again has nothing left to do
	let task = service.upgrade_to_latest_version().await.unwrap();
	let task_id = manager.submit(task.into_task()).await.unwrap();
	let details = manager.await_task(task_id, AWAIT_TIMEOUT).await.unwrap();

	assert_eq!(details.status, Status::Completed);
	assert_eq!(log.lock().unwrap().len(), 1);

	manager.stop().await;
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn partial_migration_stops_the_upgrade() {
	let store = Arc::new(MemorySchemaVersionStore::new());
	let log = Log::default();
	let manager = MemoryTaskManager::new(Hostname::new("foo"), config());

	let (three, to_three) = recording(&log, 3);
	let service = MigrationService::new(
		Arc::clone(&store) as Arc<dyn SchemaVersionStore>,
		SchemaVersion::new(3),
	)
	.with_migration(SchemaTransition::to(SchemaVersion::new(2)), PartialMigration)
	.with_migration(three, to_three);

	let task = service.upgrade_to_latest_version().await.unwrap();
	let task_id = manager.submit(task.into_task()).await.unwrap();
	let details = manager.await_task(task_id, AWAIT_TIMEOUT).await.unwrap();

	assert_eq!(details.status, Status::Failed);
	assert!(details
		.error_message
		.as_deref()
		.is_some_and(|message| message.contains("1 -> 2 only partially succeeded")));
	assert_eq!(
		information(&details).reached_version,
		Some(SchemaVersion::INITIAL)
	);

	assert_eq!(stored_version(&store).await, None);
	assert!(log.lock().unwrap().is_empty());

	manager.stop().await;
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn cancelled_migration_keeps_the_reached_version() {
	let store = Arc::new(MemorySchemaVersionStore::new());
	let log = Log::default();
	let manager = MemoryTaskManager::new(Hostname::new("foo"), config());

	let (two, to_two) = recording(&log, 2);
	let service = MigrationService::new(
		Arc::clone(&store) as Arc<dyn SchemaVersionStore>,
		SchemaVersion::new(3),
	)
	.with_migration(two, to_two)
	.with_migration(SchemaTransition::to(SchemaVersion::new(3)), BlockingMigration);

	let task = service.upgrade_to_latest_version().await.unwrap();
	let task_id = manager.submit(task.into_task()).await.unwrap();

	timeout(AWAIT_TIMEOUT, async {
		while stored_version(&store).await != Some(SchemaVersion::new(2)) {
			sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("first step never ran");

	manager.cancel(task_id).await.unwrap();
	let details = manager.await_task(task_id, AWAIT_TIMEOUT).await.unwrap();

	assert_eq!(details.status, Status::Cancelled);
	assert!(details.error_message.is_none());
	assert_eq!(
		information(&details).reached_version,
		Some(SchemaVersion::new(2))
	);
	assert_eq!(stored_version(&store).await, Some(SchemaVersion::new(2)));

	manager.stop().await;
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn migration_runs_on_a_cluster_node() {
	let store = Arc::new(MemorySchemaVersionStore::new());
	let log = Log::default();
	let service = service(&store, &log);

	let journal = Arc::new(MemoryEventJournal::default());
	let broker = MemoryBroker::default();

	let registry = Arc::new(
		TaskRegistry::new()
			.with_task(MigrationTask::module(service.clone()))
			.with_information(MigrationTask::information_module()),
	);

	let manager = EventSourcingTaskManager::start(
		Hostname::new("foo"),
		Arc::clone(&journal) as Arc<dyn EventJournal>,
		registry,
		Arc::new(broker),
		config(),
	)
	.await
	.unwrap();

	let task = service.upgrade_to_latest_version().await.unwrap();
	let task_id = manager.submit(task.into_task()).await.unwrap();
	let details = manager.await_task(task_id, AWAIT_TIMEOUT).await.unwrap();

	assert_eq!(details.status, Status::Completed);
	assert_eq!(details.ran_node, Some(Hostname::new("foo")));
	assert_eq!(
		information(&details),
		MigrationInformation {
			target_version: SchemaVersion::new(3),
			reached_version: Some(SchemaVersion::new(3)),
		}
	);
	assert_eq!(stored_version(&store).await, Some(SchemaVersion::new(3)));
	assert_eq!(log.lock().unwrap().len(), 2);

	manager.stop().await;
}
