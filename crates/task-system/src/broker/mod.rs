//! Message broker seam used by the distributed work queue.
//!
//! Two delivery models are needed: a durable queue shared by every node where a single consumer
//! is active at a time, and a fan-out exchange where every subscriber receives every message.

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use futures::{stream, Stream};
use thiserror::Error;

mod memory;

pub use memory::MemoryBroker;

#[derive(Debug, Error)]
pub enum BrokerError {
	#[error("broker destination '{0}' is closed")]
	Closed(String),
	#[error("broker is unavailable: {0}")]
	Unavailable(String),
}

/// A broker message, payloads are opaque bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
	pub headers: HashMap<String, String>,
	pub payload: Vec<u8>,
}

impl Message {
	pub fn new(payload: impl Into<Vec<u8>>) -> Self {
		Self {
			headers: HashMap::new(),
			payload: payload.into(),
		}
	}

	#[must_use]
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());
		self
	}

	#[must_use]
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name).map(String::as_str)
	}
}

/// A registered consumer, dropping it cancels the consumption.
#[async_trait]
pub trait Consumer: Send + 'static {
	/// The next delivered message, `None` once the broker closed the consumption.
	async fn recv(&mut self) -> Option<Message>;
}

/// Turns a [`Consumer`] into a [`Stream`] of its deliveries.
pub fn into_stream(consumer: Box<dyn Consumer>) -> impl Stream<Item = Message> + Send {
	stream::unfold(consumer, |mut consumer| async move {
		consumer.recv().await.map(|message| (message, consumer))
	})
}

#[async_trait]
pub trait Broker: Send + Sync + fmt::Debug + 'static {
	/// Publishes on a durable queue shared by the whole cluster.
	async fn publish(&self, queue: &str, message: Message) -> Result<(), BrokerError>;

	/// Registers a consumer on a shared queue. Only one consumer of a queue is active at a time
	/// cluster wide, the others stand by until it goes away.
	async fn consume_exclusive(&self, queue: &str) -> Result<Box<dyn Consumer>, BrokerError>;

	/// Publishes on a fan-out exchange, every current subscriber gets a copy.
	async fn broadcast(&self, exchange: &str, message: Message) -> Result<(), BrokerError>;

	/// Subscribes to a fan-out exchange, the subscription is removed when the consumer is dropped.
	async fn subscribe(&self, exchange: &str) -> Result<Box<dyn Consumer>, BrokerError>;
}
