use std::{
	fmt,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
	broker::Broker,
	config::Config,
	details::{Hostname, TaskExecutionDetails},
	error::Error,
	event::TaskEventKind,
	journal::{EventCodec, EventJournal, EventStore, JournalError},
	queue::{BrokerWorkQueue, WorkQueue},
	registry::TaskRegistry,
	task::{Task, TaskId, TaskWithId},
	worker::{Worker, WorkerEvent, WorkerListener},
};

use super::{cancelled_while_waiting, TaskManager};

/// Records what the local worker reports in the shared journal.
#[derive(Debug)]
struct JournalListener {
	hostname: Hostname,
	store: EventStore,
}

#[async_trait]
impl WorkerListener for JournalListener {
	async fn notify(&self, task: &TaskWithId, event: WorkerEvent) {
		let kind = event.into_event_kind(&self.hostname);
		let name = kind.name();

		match self
			.store
			.dispatch(task.id, |_| Some(kind.clone()))
			.await
		{
			Ok(true) => {}
			Ok(false) => debug!(task_id = %task.id, event = name, "Task refused worker event"),
			// Already warned about, only this progress sample is lost
			Err(Error::Journal(JournalError::EmptyUpdate(_))) => {}
			Err(e) => error!(?e, task_id = %task.id, event = name, "Failed to record worker event"),
		}
	}

	async fn is_cancel_requested(&self, task: &TaskWithId) -> bool {
		match self.store.load(task.id).await {
			Ok(aggregate) => aggregate.details().is_some_and(cancelled_while_waiting),
			Err(e) => {
				warn!(?e, task_id = %task.id, "Failed to read task history before starting it");
				false
			}
		}
	}
}

/// A task manager whose state lives in an [`EventJournal`] shared by every node, tasks being
/// dispatched through a [`WorkQueue`].
///
/// Any node can read, cancel or await any task, whichever node submitted or runs it.
pub struct EventSourcingTaskManager {
	hostname: Hostname,
	store: EventStore,
	work_queue: Arc<dyn WorkQueue>,
	config: Config,
	is_stopped: AtomicBool,
}

impl fmt::Debug for EventSourcingTaskManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventSourcingTaskManager")
			.field("hostname", &self.hostname)
			.field("is_stopped", &self.is_stopped)
			.finish_non_exhaustive()
	}
}

impl EventSourcingTaskManager {
	/// A cluster node, tasks are dispatched through the [`Broker`].
	#[instrument(skip_all, fields(%hostname))]
	pub async fn start(
		hostname: Hostname,
		journal: Arc<dyn EventJournal>,
		registry: Arc<TaskRegistry>,
		broker: Arc<dyn Broker>,
		config: Config,
	) -> Result<Self, Error> {
		let (store, worker) = Self::local_worker(&hostname, journal, Arc::clone(&registry), &config);

		let work_queue =
			BrokerWorkQueue::start(broker, registry, worker, config.broker.clone()).await?;

		info!("Event sourcing task manager started");

		Ok(Self::from_parts(hostname, store, Arc::new(work_queue), config))
	}

	/// A node dispatching tasks through a work queue of the caller's choosing, built around
	/// the local worker.
	pub fn with_work_queue(
		hostname: Hostname,
		journal: Arc<dyn EventJournal>,
		registry: Arc<TaskRegistry>,
		config: Config,
		work_queue: impl FnOnce(Arc<Worker>) -> Arc<dyn WorkQueue>,
	) -> Self {
		let (store, worker) = Self::local_worker(&hostname, journal, registry, &config);

		Self::from_parts(hostname, store, work_queue(worker), config)
	}

	fn local_worker(
		hostname: &Hostname,
		journal: Arc<dyn EventJournal>,
		registry: Arc<TaskRegistry>,
		config: &Config,
	) -> (EventStore, Arc<Worker>) {
		let store = EventStore::new(journal, EventCodec::new(registry));

		let worker = Arc::new(Worker::new(
			Arc::new(JournalListener {
				hostname: hostname.clone(),
				store: store.clone(),
			}),
			config.worker.clone(),
		));

		(store, worker)
	}

	const fn from_parts(
		hostname: Hostname,
		store: EventStore,
		work_queue: Arc<dyn WorkQueue>,
		config: Config,
	) -> Self {
		Self {
			hostname,
			store,
			work_queue,
			config,
			is_stopped: AtomicBool::new(false),
		}
	}

	#[must_use]
	pub const fn hostname(&self) -> &Hostname {
		&self.hostname
	}
}

#[async_trait]
impl TaskManager for EventSourcingTaskManager {
	#[instrument(skip_all, fields(hostname = %self.hostname, task_type = %task.task_type()))]
	async fn submit(&self, task: Arc<dyn Task>) -> Result<TaskId, Error> {
		if self.is_stopped.load(Ordering::SeqCst) {
			return Err(Error::Stopped);
		}

		let task_id = Uuid::new_v4();
		let created = TaskEventKind::Created {
			task_type: task.task_type(),
			// Fails early for tasks the cluster couldn't ship to another node
			task: self.store.codec().registry().encode_task(task.as_ref())?,
			hostname: self.hostname.clone(),
		};

		self.store
			.dispatch(task_id, |_| Some(created.clone()))
			.await?;
		self.work_queue
			.submit(TaskWithId { id: task_id, task })
			.await?;

		debug!(%task_id, "Task submitted");

		Ok(task_id)
	}

	async fn get_execution_details(&self, task_id: TaskId) -> Result<TaskExecutionDetails, Error> {
		self.store
			.load(task_id)
			.await?
			.into_details()
			.ok_or(Error::NotFound(task_id))
	}

	async fn list(&self) -> Result<Vec<TaskExecutionDetails>, Error> {
		let mut details = Vec::new();

		for task_id in self.store.aggregates().await? {
			match self.store.load(task_id).await {
				Ok(aggregate) => details.extend(aggregate.into_details()),
				Err(e) => warn!(?e, %task_id, "Skipping unreadable task history"),
			}
		}

		Ok(details)
	}

	#[instrument(skip(self), fields(hostname = %self.hostname))]
	async fn cancel(&self, task_id: TaskId) -> Result<(), Error> {
		let requested = self
			.store
			.dispatch(task_id, |_| {
				Some(TaskEventKind::CancelRequested {
					hostname: self.hostname.clone(),
				})
			})
			.await?;

		if requested {
			self.work_queue.cancel(task_id).await?;
		}

		Ok(())
	}

	fn await_polling_interval(&self) -> Duration {
		self.config.await_polling_interval
	}

	#[instrument(skip(self), fields(hostname = %self.hostname))]
	async fn stop(&self) {
		if self.is_stopped.swap(true, Ordering::SeqCst) {
			warn!("Trying to stop a task manager that was already stopped");
			return;
		}

		self.work_queue.close().await;

		info!("Event sourcing task manager stopped");
	}
}
