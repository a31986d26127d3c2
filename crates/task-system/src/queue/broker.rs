use std::{pin::pin, sync::Arc};

use async_channel as chan;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use futures_concurrency::stream::Merge;
use thiserror::Error;
use tokio::{spawn, sync::Mutex, task::JoinHandle};
use tracing::{debug, error, instrument, trace, warn, Instrument};
use uuid::Uuid;

use crate::{
	broker::{self, Broker, BrokerError, Consumer, Message},
	config::BrokerConfig,
	error::Error,
	registry::{RegistryError, TaskRegistry},
	task::{TaskId, TaskWithId},
	worker::{TaskOutcome, Worker},
};

use super::WorkQueue;

/// Header carrying the identifier of a task on the work queue.
pub const TASK_ID_HEADER: &str = "taskId";

#[derive(Debug, Error)]
enum DeliveryError {
	#[error("message has no 'taskId' header")]
	MissingTaskId,
	#[error("invalid task id '{0}': {1}")]
	InvalidTaskId(String, #[source] uuid::Error),
	#[error("task payload is not valid JSON: {0}")]
	Payload(#[from] serde_json::Error),
	#[error(transparent)]
	Registry(#[from] RegistryError),
}

/// A work queue shared by every node through a [`Broker`].
///
/// Tasks go through a single durable queue, only one node consumes it at a time so the cluster
/// runs one task at a time. Cancellations are broadcast to every node, the one that has the task
/// interrupts it, the others remember it in case they get the task later.
pub struct BrokerWorkQueue {
	broker: Arc<dyn Broker>,
	registry: Arc<TaskRegistry>,
	worker: Arc<Worker>,
	config: BrokerConfig,
	stop_tx: chan::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerWorkQueue {
	#[instrument(skip_all, fields(work_queue = %config.work_queue))]
	pub async fn start(
		broker: Arc<dyn Broker>,
		registry: Arc<TaskRegistry>,
		worker: Arc<Worker>,
		config: BrokerConfig,
	) -> Result<Self, BrokerError> {
		let consumer = broker.consume_exclusive(&config.work_queue).await?;
		let cancellations = broker.subscribe(&config.cancel_exchange).await?;

		let (stop_tx, stop_rx) = chan::bounded(1);

		let handles = vec![
			spawn(
				consume_tasks(
					TaskDelivery {
						worker: Arc::clone(&worker),
						registry: Arc::clone(&registry),
						broker: Arc::clone(&broker),
						work_queue: config.work_queue.clone(),
					},
					consumer,
					stop_rx.clone(),
				)
				.in_current_span(),
			),
			spawn(listen_cancellations(Arc::clone(&worker), cancellations, stop_rx).in_current_span()),
		];

		debug!("Broker work queue started");

		Ok(Self {
			broker,
			registry,
			worker,
			config,
			stop_tx,
			handles: Mutex::new(handles),
		})
	}
}

#[async_trait]
impl WorkQueue for BrokerWorkQueue {
	async fn submit(&self, task: TaskWithId) -> Result<(), Error> {
		let payload = serde_json::to_vec(&self.registry.encode_task(task.task.as_ref())?)?;

		self.broker
			.publish(
				&self.config.work_queue,
				Message::new(payload).with_header(TASK_ID_HEADER, task.id.to_string()),
			)
			.await?;

		Ok(())
	}

	async fn cancel(&self, task_id: TaskId) -> Result<(), Error> {
		self.broker
			.broadcast(
				&self.config.cancel_exchange,
				Message::new(task_id.to_string()),
			)
			.await?;

		Ok(())
	}

	#[instrument(skip(self))]
	async fn close(&self) {
		let handles = std::mem::take(&mut *self.handles.lock().await);
		if handles.is_empty() {
			warn!("Trying to close a work queue that was already closed");
			return;
		}

		self.stop_tx.close();
		self.worker.close().await;

		for handle in handles {
			if let Err(e) = handle.await {
				if e.is_panic() {
					error!(?e, "Broker work queue loop critically failed");
				}
			}
		}

		debug!("Broker work queue closed");
	}
}

enum StreamMessage {
	Delivery(Message),
	Stop,
}

fn with_stop(
	consumer: Box<dyn Consumer>,
	stop_rx: chan::Receiver<()>,
) -> impl futures::Stream<Item = StreamMessage> + Send {
	(
		broker::into_stream(consumer).map(StreamMessage::Delivery),
		stream::once(async move {
			let _ = stop_rx.recv().await;
			StreamMessage::Stop
		}),
	)
		.merge()
}

struct TaskDelivery {
	worker: Arc<Worker>,
	registry: Arc<TaskRegistry>,
	broker: Arc<dyn Broker>,
	work_queue: String,
}

async fn consume_tasks(
	delivery: TaskDelivery,
	consumer: Box<dyn Consumer>,
	stop_rx: chan::Receiver<()>,
) {
	let mut msg_stream = pin!(with_stop(consumer, stop_rx.clone()));

	// The stop signal wins over pending deliveries once the running task is done
	while !stop_rx.is_closed() {
		let Some(msg) = msg_stream.next().await else {
			warn!("Broker closed the work queue consumption");
			return;
		};

		match msg {
			StreamMessage::Delivery(message) => delivery.handle(message).await,

			StreamMessage::Stop => break,
		}
	}

	trace!("Work queue consumer received stop signal");
}

impl TaskDelivery {
	async fn handle(&self, message: Message) {
		let task = match decode_delivery(&self.registry, &message) {
			Ok(task) => task,
			// A poisoned message must not stop the node from consuming the next ones
			Err(e) => {
				error!(
					?e,
					headers = ?message.headers,
					"Discarding undecodable work queue message"
				);
				return;
			}
		};

		let task_id = task.id;
		let outcome = self.worker.execute_task(task).await;
		trace!(%task_id, ?outcome, "Broker work queue delivered a task");

		if outcome == TaskOutcome::NotStarted {
			// Closed while the message was being delivered, another node has to run it
			debug!(%task_id, "Requeueing task refused by a closed worker");
			if let Err(e) = self.broker.publish(&self.work_queue, message).await {
				error!(?e, %task_id, "Failed to requeue task, it will never run");
			}
		}
	}
}

async fn listen_cancellations(
	worker: Arc<Worker>,
	subscription: Box<dyn Consumer>,
	stop_rx: chan::Receiver<()>,
) {
	let mut msg_stream = pin!(with_stop(subscription, stop_rx));

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::Delivery(message) => match parse_task_id(&message.payload) {
				Ok(task_id) => worker.cancel_task(task_id).await,
				Err(e) => warn!(?e, "Ignoring invalid cancellation request"),
			},

			StreamMessage::Stop => {
				trace!("Cancellation listener received stop signal");
				return;
			}
		}
	}
}

fn decode_delivery(registry: &TaskRegistry, message: &Message) -> Result<TaskWithId, DeliveryError> {
	let raw_id = message
		.header(TASK_ID_HEADER)
		.ok_or(DeliveryError::MissingTaskId)?;
	let id = Uuid::parse_str(raw_id)
		.map_err(|e| DeliveryError::InvalidTaskId(raw_id.to_string(), e))?;

	let task = registry.decode_task(serde_json::from_slice(&message.payload)?)?;

	Ok(TaskWithId { id, task })
}

fn parse_task_id(payload: &[u8]) -> Result<TaskId, DeliveryError> {
	let raw_id = String::from_utf8_lossy(payload);

	Uuid::parse_str(raw_id.trim()).map_err(|e| DeliveryError::InvalidTaskId(raw_id.to_string(), e))
}
