use std::{collections::HashMap, fmt, sync::Arc};

use async_channel as chan;
use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use super::{Broker, BrokerError, Consumer, Message};

#[derive(Debug, Clone)]
struct SharedQueue {
	tx: chan::Sender<Message>,
	rx: chan::Receiver<Message>,
	lease: Arc<Mutex<()>>,
}

impl Default for SharedQueue {
	fn default() -> Self {
		let (tx, rx) = chan::unbounded();

		Self {
			tx,
			rx,
			lease: Arc::default(),
		}
	}
}

#[derive(Debug, Default)]
struct Inner {
	queues: Mutex<HashMap<String, SharedQueue>>,
	exchanges: Mutex<HashMap<String, Vec<chan::Sender<Message>>>>,
}

/// An in-process [`Broker`], cloning it gives another connection to the same broker, so every
/// node of a test cluster can share it.
///
/// Messages are acknowledged on delivery.
#[derive(Clone, Default)]
pub struct MemoryBroker {
	inner: Arc<Inner>,
}

impl fmt::Debug for MemoryBroker {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryBroker").finish_non_exhaustive()
	}
}

impl MemoryBroker {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	async fn queue(&self, name: &str) -> SharedQueue {
		self.inner
			.queues
			.lock()
			.await
			.entry(name.to_string())
			.or_default()
			.clone()
	}

	/// Number of messages waiting on a shared queue.
	pub async fn pending(&self, queue: &str) -> usize {
		self.queue(queue).await.rx.len()
	}
}

#[async_trait]
impl Broker for MemoryBroker {
	async fn publish(&self, queue: &str, message: Message) -> Result<(), BrokerError> {
		self.queue(queue)
			.await
			.tx
			.send(message)
			.await
			.map_err(|_| BrokerError::Closed(queue.to_string()))
	}

	async fn consume_exclusive(&self, queue: &str) -> Result<Box<dyn Consumer>, BrokerError> {
		let SharedQueue { rx, lease, .. } = self.queue(queue).await;

		Ok(Box::new(ExclusiveConsumer {
			queue: queue.to_string(),
			rx,
			lease,
			guard: None,
		}))
	}

	async fn broadcast(&self, exchange: &str, message: Message) -> Result<(), BrokerError> {
		let mut exchanges = self.inner.exchanges.lock().await;
		let subscribers = exchanges.entry(exchange.to_string()).or_default();

		subscribers.retain(|tx| !tx.is_closed());

		trace!(exchange, subscribers = subscribers.len(), "Broadcasting message");

		for tx in subscribers.iter() {
			// Unbounded, so this only fails for a subscription dropped meanwhile
			if tx.try_send(message.clone()).is_err() {
				trace!(exchange, "Subscriber went away during broadcast");
			}
		}

		Ok(())
	}

	async fn subscribe(&self, exchange: &str) -> Result<Box<dyn Consumer>, BrokerError> {
		let (tx, rx) = chan::unbounded();

		self.inner
			.exchanges
			.lock()
			.await
			.entry(exchange.to_string())
			.or_default()
			.push(tx);

		Ok(Box::new(Subscription { rx }))
	}
}

/// Holds the queue lease while active, standby consumers wait on the lease before receiving.
struct ExclusiveConsumer {
	queue: String,
	rx: chan::Receiver<Message>,
	lease: Arc<Mutex<()>>,
	guard: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
impl Consumer for ExclusiveConsumer {
	async fn recv(&mut self) -> Option<Message> {
		if self.guard.is_none() {
			self.guard = Some(Arc::clone(&self.lease).lock_owned().await);
			debug!(queue = %self.queue, "Became the active consumer");
		}

		self.rx.recv().await.ok()
	}
}

struct Subscription {
	rx: chan::Receiver<Message>,
}

#[async_trait]
impl Consumer for Subscription {
	async fn recv(&mut self) -> Option<Message> {
		self.rx.recv().await.ok()
	}
}
