//!
//! # Task System
//!
//! A task manager for long-running administrative operations of a mail server, like reindexing
//! mailboxes or migrating storage schemas, that can be followed and cancelled from any node of a
//! cluster.
//!
//! - Tasks are submitted to a [`TaskManager`], which gives back a [`TaskId`] to follow them;
//! - A node executes one task at a time, and with the distributed manager a single node of the
//!   whole cluster consumes the shared work queue at a time;
//! - Cancellation is cooperative through the [`Interrupter`] handed to [`Task::run`], tasks
//!   ignoring it are preempted at their next await point after a grace period;
//! - Tasks report [`AdditionalInformation`] that is sampled while they run and kept on their
//!   [`TaskExecutionDetails`];
//! - The distributed manager rebuilds every task lifecycle from an event journal shared by all
//!   nodes, so any node can read, cancel or await any task.
//!
//! ## Basic example
//!
//! ```
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use mail_task_system::{
//!     Config, Hostname, Interrupter, IntoTask, MemoryTaskManager, RunError, Status, Task,
//!     TaskManager, TaskResult, TaskType,
//! };
//!
//! #[derive(Debug)]
//! pub struct ReadyTask;
//!
//! #[async_trait]
//! impl Task for ReadyTask {
//!     fn task_type(&self) -> TaskType {
//!         TaskType::of("ready")
//!     }
//!
//!     async fn run(&self, _interrupter: &Interrupter) -> Result<TaskResult, RunError> {
//!         Ok(TaskResult::Completed)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = MemoryTaskManager::new(Hostname::local(), Config::default());
//!
//!     let task_id = manager.submit(ReadyTask.into_task()).await.unwrap();
//!     let details = manager
//!         .await_task(task_id, Duration::from_secs(5))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(details.status, Status::Completed);
//!
//!     manager.stop().await;
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod broker;
mod config;
mod details;
mod error;
mod event;
mod interrupter;
mod journal;
mod manager;
mod queue;
mod registry;
mod task;
mod worker;

pub use broker::{into_stream, Broker, BrokerError, Consumer, MemoryBroker, Message};
pub use config::{BrokerConfig, Config, ConfigError, WorkerConfig};
pub use details::{Hostname, Status, TaskExecutionDetails, UnknownStatusError};
pub use error::Error;
pub use event::{EventId, TaskEvent, TaskEventKind};
pub use interrupter::{InterruptHandle, Interrupted, Interrupter, InterrupterFuture};
pub use journal::{
	EventCodec, EventJournal, EventStore, JournalError, MemoryEventJournal, TaskAggregate,
};
pub use manager::{
	EventSourcingTaskManager, MemoryTaskManager, TaskManager, DEFAULT_AWAIT_POLLING_INTERVAL,
};
pub use queue::{BrokerWorkQueue, MemoryWorkQueue, WorkQueue, TASK_ID_HEADER};
pub use registry::{task_type_of, InformationModule, RegistryError, TaskModule, TaskRegistry};
pub use task::{
	AdditionalInformation, IntoTask, RunError, Task, TaskId, TaskResult, TaskType, TaskWithId,
};
pub use worker::{TaskOutcome, Worker, WorkerEvent, WorkerListener};
