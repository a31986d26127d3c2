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
use tokio::{
	spawn,
	sync::{watch, Mutex},
	task::AbortHandle,
	time::{sleep, timeout, Instant},
};
use tracing::{debug, info, instrument, trace, warn, Instrument};

use super::{
	config::WorkerConfig,
	details::Hostname,
	event::TaskEventKind,
	interrupter::InterruptHandle,
	task::{AdditionalInformation, TaskId, TaskResult, TaskWithId},
};

mod run;

/// What a worker reports about the task it's executing, in order: `Started`, any number of
/// `Updated`, then exactly one terminal event. A task cancelled before being picked only
/// gets `Cancelled`.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
	Started,
	Updated(Arc<dyn AdditionalInformation>),
	Completed {
		result: TaskResult,
		information: Option<Arc<dyn AdditionalInformation>>,
	},
	Failed {
		information: Option<Arc<dyn AdditionalInformation>>,
		error_message: Option<String>,
		exception: Option<String>,
	},
	Cancelled {
		information: Option<Arc<dyn AdditionalInformation>>,
	},
}

impl WorkerEvent {
	/// The lifecycle event recorded for this report, `hostname` being the node whose worker
	/// emitted it.
	#[must_use]
	pub fn into_event_kind(self, hostname: &Hostname) -> TaskEventKind {
		match self {
			Self::Started => TaskEventKind::Started {
				hostname: hostname.clone(),
			},
			Self::Updated(information) => TaskEventKind::Updated {
				information: Some(information),
			},
			Self::Completed {
				result,
				information,
			} => TaskEventKind::Completed {
				result,
				information,
			},
			Self::Failed {
				information,
				error_message,
				exception,
			} => TaskEventKind::Failed {
				information,
				error_message,
				exception,
			},
			Self::Cancelled { information } => TaskEventKind::Cancelled { information },
		}
	}
}

/// Receives the [`WorkerEvent`]s of every task a worker executes.
///
/// Notifications are awaited inline by the worker, so a listener sees the events of a task in
/// the order they happened.
#[async_trait]
pub trait WorkerListener: Send + Sync + fmt::Debug + 'static {
	async fn notify(&self, task: &TaskWithId, event: WorkerEvent);

	/// Whether a cancellation of `task` was recorded elsewhere before the worker picked it.
	///
	/// Checked before starting a task, on top of the cancellations the worker received itself.
	async fn is_cancel_requested(&self, _task: &TaskWithId) -> bool {
		false
	}
}

/// How a call to [`Worker::execute_task`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
	Completed(TaskResult),
	Failed,
	Cancelled,
	/// The worker was closed, the task wasn't touched and no event was emitted
	NotStarted,
}

#[derive(Debug)]
struct RunningTask {
	id: TaskId,
	interrupt_handle: InterruptHandle,
	abort_handle: Option<AbortHandle>,
	cancel_requested: bool,
}

#[derive(Debug, Default)]
struct WorkerState {
	/// Cancellations of tasks that weren't running when received, with their reception time
	cancelled: HashMap<TaskId, Instant>,
	running: Option<RunningTask>,
}

impl WorkerState {
	fn remember_cancellation(&mut self, task_id: TaskId, retention: Duration) {
		let before = self.cancelled.len();
		self.cancelled
			.retain(|_, received_at| received_at.elapsed() < retention);

		let expired = before - self.cancelled.len();
		if expired > 0 {
			trace!(expired, "Forgot expired cancellations");
		}

		self.cancelled.insert(task_id, Instant::now());
	}
}

/// Executes tasks one at a time, honoring cancellations whether they arrive before or while a
/// task runs.
#[derive(Debug)]
pub struct Worker {
	config: WorkerConfig,
	listener: Arc<dyn WorkerListener>,
	state: Mutex<WorkerState>,
	running_tx: watch::Sender<Option<TaskId>>,
	is_closed: AtomicBool,
}

impl Worker {
	pub fn new(listener: Arc<dyn WorkerListener>, config: WorkerConfig) -> Self {
		let (running_tx, _) = watch::channel(None);

		Self {
			config,
			listener,
			state: Mutex::default(),
			running_tx,
			is_closed: AtomicBool::new(false),
		}
	}

	/// Runs `task` to its end, the lifecycle is reported through the [`WorkerListener`].
	///
	/// Callers must not execute tasks concurrently on the same worker.
	#[instrument(
		name = "task_execution",
		skip_all,
		fields(task_id = %task.id, task_type = %task.task_type())
	)]
	pub async fn execute_task(&self, task: TaskWithId) -> TaskOutcome {
		run::execute(self, task).await
	}

	/// Marks `task_id` as cancelled. A running task gets interrupted and, if it doesn't stop on
	/// its own within the cancellation grace period, preempted at its next await point.
	#[instrument(skip(self))]
	pub async fn cancel_task(&self, task_id: TaskId) {
		let mut state = self.state.lock().await;

		let Some(running) = state
			.running
			.as_mut()
			.filter(|running| running.id == task_id)
		else {
			trace!("Task isn't running here, it will be skipped if picked soon");
			state.remember_cancellation(task_id, self.config.cancellation_retention);
			return;
		};

		if running.cancel_requested {
			return;
		}

		debug!("Interrupting running task");
		running.interrupt_handle.interrupt();
		running.cancel_requested = true;

		if let Some(abort_handle) = running.abort_handle.clone() {
			self.schedule_preemption(abort_handle);
		}
	}

	/// Refuses any further task, cancels the running one and waits up to the shutdown timeout
	/// for it to acknowledge the cancellation.
	#[instrument(skip(self))]
	pub async fn close(&self) {
		// Under the state lock, so a task is either refused or seen as running here
		let running = {
			let state = self.state.lock().await;

			if self.is_closed.swap(true, Ordering::SeqCst) {
				warn!("Trying to close a worker that was already closed");
				return;
			}

			state.running.as_ref().map(|running| running.id)
		};

		if let Some(task_id) = running {
			self.cancel_task(task_id).await;

			let mut running_rx = self.running_tx.subscribe();
			let acknowledged = timeout(
				self.config.shutdown_timeout,
				running_rx.wait_for(Option::is_none),
			)
			.await
			.is_ok();

			if !acknowledged {
				warn!(%task_id, "Running task didn't acknowledge its cancellation in time");
			}
		}

		info!("Worker gracefully closed");
	}

	/// The task currently being executed, if any.
	#[must_use]
	pub fn running_task(&self) -> Option<TaskId> {
		*self.running_tx.borrow()
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.is_closed.load(Ordering::SeqCst)
	}

	fn schedule_preemption(&self, abort_handle: AbortHandle) {
		let grace_period = self.config.cancellation_grace_period;

		spawn(preempt_after(grace_period, abort_handle).in_current_span());
	}
}

async fn preempt_after(grace_period: Duration, abort_handle: AbortHandle) {
	sleep(grace_period).await;

	if !abort_handle.is_finished() {
		warn!(?grace_period, "Task ignored its interruption, preempting it");
		abort_handle.abort();
	}
}
