#![allow(dead_code)]

use mail_task_system::{
	Config, EventJournal, EventSourcingTaskManager, Hostname, InformationModule, MemoryBroker,
	MemoryEventJournal, Status, TaskExecutionDetails, TaskId, TaskManager, TaskModule,
	TaskRegistry, WorkerConfig,
};

use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, timeout};

pub mod tasks;

use tasks::{
	CountingInformation, CountingTask, FailingTask, PanickingTask, PartialTask, ReadyTask,
	ReportingTask, SleepTask, StubbornTask,
};

pub const AWAIT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn config() -> Config {
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

pub fn registry() -> Arc<TaskRegistry> {
	Arc::new(
		TaskRegistry::new()
			.with_task(TaskModule::serde::<ReadyTask>(ReadyTask::TYPE))
			.with_task(TaskModule::serde::<PartialTask>(PartialTask::TYPE))
			.with_task(TaskModule::serde::<FailingTask>(FailingTask::TYPE))
			.with_task(TaskModule::serde::<PanickingTask>(PanickingTask::TYPE))
			.with_task(TaskModule::serde::<SleepTask>(SleepTask::TYPE))
			.with_task(TaskModule::serde::<StubbornTask>(StubbornTask::TYPE))
			.with_task(TaskModule::serde::<ReportingTask>(ReportingTask::TYPE))
			.with_task(TaskModule::new(
				CountingTask::TYPE,
				CountingTask::to_dto,
				CountingTask::from_dto,
			))
			.with_information(InformationModule::serde::<CountingInformation>(
				CountingTask::TYPE,
			)),
	)
}

/// Nodes sharing one journal and one broker.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
	pub journal: Arc<MemoryEventJournal>,
	pub broker: MemoryBroker,
}

impl Cluster {
	pub async fn node(&self, name: &str) -> EventSourcingTaskManager {
		EventSourcingTaskManager::start(
			Hostname::new(name),
			Arc::clone(&self.journal) as Arc<dyn EventJournal>,
			registry(),
			Arc::new(self.broker.clone()),
			config(),
		)
		.await
		.unwrap()
	}
}

/// Polls the task details until `predicate` holds.
pub async fn eventually(
	manager: &impl TaskManager,
	task_id: TaskId,
	predicate: impl Fn(&TaskExecutionDetails) -> bool,
) -> TaskExecutionDetails {
	timeout(AWAIT_TIMEOUT, async {
		loop {
			if let Ok(details) = manager.get_execution_details(task_id).await {
				if predicate(&details) {
					return details;
				}
			}

			sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("task never reached the expected state")
}

pub async fn wait_for_status(
	manager: &impl TaskManager,
	task_id: TaskId,
	status: Status,
) -> TaskExecutionDetails {
	eventually(manager, task_id, |details| details.status == status).await
}

pub fn counted(details: &TaskExecutionDetails) -> Option<u64> {
	details
		.additional_information
		.as_ref()
		.and_then(|info| info.downcast_ref::<CountingInformation>())
		.map(|info| info.count)
}
