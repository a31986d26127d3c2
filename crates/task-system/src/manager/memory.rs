use std::{
	collections::HashMap,
	fmt,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
	config::Config,
	details::{Hostname, TaskExecutionDetails},
	error::Error,
	event::TaskEventKind,
	queue::{MemoryWorkQueue, WorkQueue},
	task::{Task, TaskId, TaskWithId},
	worker::{Worker, WorkerEvent, WorkerListener},
};

use super::{cancelled_while_waiting, TaskManager};

#[derive(Debug, Default)]
struct DetailsStore {
	details: HashMap<TaskId, TaskExecutionDetails>,
	order: Vec<TaskId>,
}

impl DetailsStore {
	fn apply(&mut self, task_id: TaskId, kind: &TaskEventKind) -> bool {
		let mut details = self.details.remove(&task_id);
		let is_new = details.is_none();
		let applied = kind.apply(task_id, &mut details, Utc::now());

		if let Some(details) = details {
			if is_new {
				self.order.push(task_id);
			}
			self.details.insert(task_id, details);
		}

		applied
	}
}

#[derive(Debug)]
struct DetailsListener {
	hostname: Hostname,
	store: Arc<RwLock<DetailsStore>>,
}

#[async_trait]
impl WorkerListener for DetailsListener {
	async fn notify(&self, task: &TaskWithId, event: WorkerEvent) {
		let kind = event.into_event_kind(&self.hostname);

		if !self.store.write().await.apply(task.id, &kind) {
			debug!(task_id = %task.id, event = kind.name(), "Ignoring worker event");
		}
	}

	async fn is_cancel_requested(&self, task: &TaskWithId) -> bool {
		self.store
			.read()
			.await
			.details
			.get(&task.id)
			.is_some_and(cancelled_while_waiting)
	}
}

/// A single node task manager keeping every task details in memory.
pub struct MemoryTaskManager {
	hostname: Hostname,
	store: Arc<RwLock<DetailsStore>>,
	work_queue: MemoryWorkQueue,
	config: Config,
	is_stopped: AtomicBool,
}

impl fmt::Debug for MemoryTaskManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryTaskManager")
			.field("hostname", &self.hostname)
			.field("is_stopped", &self.is_stopped)
			.finish_non_exhaustive()
	}
}

impl MemoryTaskManager {
	pub fn new(hostname: Hostname, config: Config) -> Self {
		let store = Arc::new(RwLock::new(DetailsStore::default()));

		let worker = Arc::new(Worker::new(
			Arc::new(DetailsListener {
				hostname: hostname.clone(),
				store: Arc::clone(&store),
			}),
			config.worker.clone(),
		));

		info!(%hostname, "Memory task manager started");

		Self {
			hostname,
			store,
			work_queue: MemoryWorkQueue::new(worker),
			config,
			is_stopped: AtomicBool::new(false),
		}
	}
}

#[async_trait]
impl TaskManager for MemoryTaskManager {
	#[instrument(skip_all, fields(task_type = %task.task_type()))]
	async fn submit(&self, task: Arc<dyn Task>) -> Result<TaskId, Error> {
		if self.is_stopped.load(Ordering::SeqCst) {
			return Err(Error::Stopped);
		}

		let task_id = Uuid::new_v4();

		self.store.write().await.apply(
			task_id,
			&TaskEventKind::Created {
				task_type: task.task_type(),
				task: serde_json::Value::Null,
				hostname: self.hostname.clone(),
			},
		);

		self.work_queue.submit(TaskWithId { id: task_id, task }).await?;

		debug!(%task_id, "Task submitted");

		Ok(task_id)
	}

	async fn get_execution_details(&self, task_id: TaskId) -> Result<TaskExecutionDetails, Error> {
		self.store
			.read()
			.await
			.details
			.get(&task_id)
			.cloned()
			.ok_or(Error::NotFound(task_id))
	}

	async fn list(&self) -> Result<Vec<TaskExecutionDetails>, Error> {
		let store = self.store.read().await;

		Ok(store
			.order
			.iter()
			.filter_map(|task_id| store.details.get(task_id).cloned())
			.collect())
	}

	#[instrument(skip(self))]
	async fn cancel(&self, task_id: TaskId) -> Result<(), Error> {
		let requested = self.store.write().await.apply(
			task_id,
			&TaskEventKind::CancelRequested {
				hostname: self.hostname.clone(),
			},
		);

		if requested {
			self.work_queue.cancel(task_id).await?;
		}

		Ok(())
	}

	fn await_polling_interval(&self) -> Duration {
		self.config.await_polling_interval
	}

	#[instrument(skip(self))]
	async fn stop(&self) {
		if self.is_stopped.swap(true, Ordering::SeqCst) {
			warn!("Trying to stop a task manager that was already stopped");
			return;
		}

		self.work_queue.close().await;

		info!("Memory task manager stopped");
	}
}
