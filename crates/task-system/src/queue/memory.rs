use std::{pin::pin, sync::Arc};

use async_channel as chan;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use futures_concurrency::stream::Merge;
use tokio::{spawn, sync::Mutex, task::JoinHandle};
use tracing::{error, info, instrument, trace, warn, Instrument};

use crate::{
	error::Error,
	task::{TaskId, TaskWithId},
	worker::Worker,
};

use super::WorkQueue;

/// A single node work queue, tasks are buffered in memory and lost when the process goes away.
#[derive(Debug)]
pub struct MemoryWorkQueue {
	tasks_tx: chan::Sender<TaskWithId>,
	stop_tx: chan::Sender<()>,
	worker: Arc<Worker>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryWorkQueue {
	pub fn new(worker: Arc<Worker>) -> Self {
		let (tasks_tx, tasks_rx) = chan::unbounded();
		let (stop_tx, stop_rx) = chan::bounded(1);

		let handle = spawn(consume(Arc::clone(&worker), tasks_rx, stop_rx).in_current_span());

		Self {
			tasks_tx,
			stop_tx,
			worker,
			handle: Mutex::new(Some(handle)),
		}
	}
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
	async fn submit(&self, task: TaskWithId) -> Result<(), Error> {
		// The consumer loop owns the receiver, a failed send means the queue was closed
		self.tasks_tx.send(task).await.map_err(|chan::SendError(task)| {
			warn!(task_id = %task.id, "Work queue is closed, refusing task");
			Error::Stopped
		})
	}

	async fn cancel(&self, task_id: TaskId) -> Result<(), Error> {
		self.worker.cancel_task(task_id).await;

		Ok(())
	}

	#[instrument(skip(self))]
	async fn close(&self) {
		let Some(handle) = self.handle.lock().await.take() else {
			warn!("Trying to close a work queue that was already closed");
			return;
		};

		// Closing the channel is the stop signal
		self.stop_tx.close();
		self.worker.close().await;

		if let Err(e) = handle.await {
			if e.is_panic() {
				error!(?e, "Work queue consumer critically failed");
			}
		}

		let dropped = self.tasks_tx.len();
		if dropped > 0 {
			info!(dropped, "Work queue closed with tasks still buffered");
		}
	}
}

async fn consume(
	worker: Arc<Worker>,
	tasks_rx: chan::Receiver<TaskWithId>,
	stop_rx: chan::Receiver<()>,
) {
	enum StreamMessage {
		NewTask(TaskWithId),
		Stop,
	}

	let mut msg_stream = pin!((
		tasks_rx.map(StreamMessage::NewTask),
		stream::once(async move {
			let _ = stop_rx.recv().await;
			StreamMessage::Stop
		}),
	)
		.merge());

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::NewTask(task) => {
				let outcome = worker.execute_task(task).await;
				trace!(?outcome, "Work queue delivered a task");
			}

			StreamMessage::Stop => {
				trace!("Work queue received stop signal");
				break;
			}
		}
	}
}
