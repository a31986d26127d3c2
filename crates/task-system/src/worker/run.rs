use std::{
	any::Any,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::Arc,
	time::Duration,
};

use tokio::{
	spawn,
	task::JoinError,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::{debug, error, trace, warn, Instrument};

use super::{RunningTask, TaskOutcome, Worker, WorkerEvent, WorkerListener};

use crate::{
	interrupter::Interrupter,
	task::{AdditionalInformation, RunError, TaskResult, TaskWithId},
};

pub(super) async fn execute(worker: &Worker, task: TaskWithId) -> TaskOutcome {
	if worker.is_closed() {
		debug!("Worker is closed, task will not be started");
		return TaskOutcome::NotStarted;
	}

	let cancelled_elsewhere = worker.listener.is_cancel_requested(&task).await;
	let (interrupter, interrupt_handle) = Interrupter::new();

	{
		let mut state = worker.state.lock().await;

		// Checked again under the lock, `close` only sees tasks registered as running
		if worker.is_closed() {
			debug!("Worker was closed meanwhile, task will not be started");
			return TaskOutcome::NotStarted;
		}

		if state.cancelled.remove(&task.id).is_some() || cancelled_elsewhere {
			drop(state);

			debug!("Task was cancelled before being started, skipping it");
			worker
				.listener
				.notify(
					&task,
					WorkerEvent::Cancelled {
						information: sample(&task),
					},
				)
				.await;

			return TaskOutcome::Cancelled;
		}

		state.running = Some(RunningTask {
			id: task.id,
			interrupt_handle,
			abort_handle: None,
			cancel_requested: false,
		});
		worker.running_tx.send_replace(Some(task.id));
	}

	trace!("Task started");
	worker.listener.notify(&task, WorkerEvent::Started).await;

	let handle = spawn(
		{
			let task = Arc::clone(&task.task);
			async move { task.run(&interrupter).await }
		}
		.in_current_span(),
	);

	{
		let mut state = worker.state.lock().await;
		if let Some(running) = state.running.as_mut() {
			running.abort_handle = Some(handle.abort_handle());

			// A cancellation arrived while the body was being spawned
			if running.cancel_requested {
				worker.schedule_preemption(handle.abort_handle());
			}
		}
	}

	let sampler = spawn(
		sample_periodically(
			task.clone(),
			Arc::clone(&worker.listener),
			worker.config.additional_information_polling_interval,
		)
		.in_current_span(),
	);

	let res = handle.await;

	// Making sure no update can be emitted after the terminal event
	sampler.abort();
	if let Err(e) = sampler.await {
		if e.is_panic() {
			error!(?e, "Additional information sampler critically failed");
		}
	}

	let (event, outcome) = into_terminal_event(res, sample(&task));
	worker.listener.notify(&task, event).await;

	{
		let mut state = worker.state.lock().await;
		state.running = None;
		state.cancelled.remove(&task.id);
	}
	worker.running_tx.send_replace(None);

	outcome
}

fn into_terminal_event(
	res: Result<Result<TaskResult, RunError>, JoinError>,
	information: Option<Arc<dyn AdditionalInformation>>,
) -> (WorkerEvent, TaskOutcome) {
	match res {
		Ok(Ok(result)) => {
			debug!(?result, "Task completed");
			(
				WorkerEvent::Completed {
					result,
					information,
				},
				TaskOutcome::Completed(result),
			)
		}

		Ok(Err(e)) if e.is_interruption() => {
			debug!("Task acknowledged its cancellation");
			(
				WorkerEvent::Cancelled { information },
				TaskOutcome::Cancelled,
			)
		}

		Ok(Err(e)) => {
			error!(?e, "Task failed");
			(
				WorkerEvent::Failed {
					information,
					error_message: Some(e.to_string()),
					exception: Some(e.render_chain()),
				},
				TaskOutcome::Failed,
			)
		}

		Err(e) if e.is_cancelled() => {
			debug!("Task was preempted after its cancellation grace period");
			(
				WorkerEvent::Cancelled { information },
				TaskOutcome::Cancelled,
			)
		}

		Err(e) => {
			let message = panic_message(e.into_panic());
			error!(%message, "Task panicked");
			(
				WorkerEvent::Failed {
					information,
					error_message: Some(message.clone()),
					exception: Some(format!("task panicked: {message}")),
				},
				TaskOutcome::Failed,
			)
		}
	}
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
	payload
		.downcast_ref::<&str>()
		.map(ToString::to_string)
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Reads the task details, a panicking implementation only costs this sample.
fn sample(task: &TaskWithId) -> Option<Arc<dyn AdditionalInformation>> {
	catch_unwind(AssertUnwindSafe(|| task.task.details())).unwrap_or_else(|_| {
		warn!("Task panicked while reporting its additional information");
		None
	})
}

async fn sample_periodically(
	task: TaskWithId,
	listener: Arc<dyn WorkerListener>,
	period: Duration,
) {
	let mut ticker = interval_at(Instant::now() + period, period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
	let mut ticks = IntervalStream::new(ticker);

	while ticks.next().await.is_some() {
		if let Some(information) = sample(&task) {
			listener
				.notify(&task, WorkerEvent::Updated(information))
				.await;
		}
	}
}
