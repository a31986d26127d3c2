use mail_task_system::{
	check_interruption, AdditionalInformation, Interrupter, RunError, Task, TaskResult, TaskType,
};

use std::{
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Opens once released, every waiter then goes through.
#[derive(Debug, Clone)]
pub struct Latch {
	tx: chan::Sender<()>,
	rx: chan::Receiver<()>,
}

impl Default for Latch {
	fn default() -> Self {
		let (tx, rx) = chan::bounded(1);
		Self { tx, rx }
	}
}

impl Latch {
	pub fn release(&self) {
		self.tx.close();
	}

	pub async fn wait(&self) {
		let _ = self.rx.recv().await;
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadyTask {}

impl ReadyTask {
	pub const TYPE: TaskType = TaskType::of("ready");
}

#[async_trait]
impl Task for ReadyTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, _interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		Ok(TaskResult::Completed)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialTask {}

impl PartialTask {
	pub const TYPE: TaskType = TaskType::of("partial");
}

#[async_trait]
impl Task for PartialTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, _interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		Ok(TaskResult::Partial)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailingTask {
	pub message: String,
}

impl FailingTask {
	pub const TYPE: TaskType = TaskType::of("failing");

	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}
}

#[async_trait]
impl Task for FailingTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, _interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		Err(RunError::other(self.message.clone()))
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanickingTask {}

impl PanickingTask {
	pub const TYPE: TaskType = TaskType::of("panicking");
}

#[async_trait]
impl Task for PanickingTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, _interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		panic!("mailbox index is corrupted");
	}
}

/// Sleeps, honoring interruptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepTask {
	pub millis: u64,
}

impl SleepTask {
	pub const TYPE: TaskType = TaskType::of("sleep");

	pub const fn new(duration: Duration) -> Self {
		Self {
			millis: duration.as_millis() as u64,
		}
	}
}

#[async_trait]
impl Task for SleepTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		interrupter
			.sleep(Duration::from_millis(self.millis))
			.await?;

		Ok(TaskResult::Completed)
	}
}

/// Sleeps without ever looking at its interrupter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubbornTask {
	pub millis: u64,
}

impl StubbornTask {
	pub const TYPE: TaskType = TaskType::of("stubborn");
}

#[async_trait]
impl Task for StubbornTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, _interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		tokio::time::sleep(Duration::from_millis(self.millis)).await;

		Ok(TaskResult::Completed)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountingInformation {
	pub count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountingTaskDto {
	pub limit: u64,
	pub step_millis: u64,
}

/// Counts up to `limit`, one step at a time, reporting its count.
#[derive(Debug)]
pub struct CountingTask {
	pub limit: u64,
	pub step: Duration,
	count: AtomicU64,
}

impl CountingTask {
	pub const TYPE: TaskType = TaskType::of("counting");

	pub const fn new(limit: u64, step: Duration) -> Self {
		Self {
			limit,
			step,
			count: AtomicU64::new(0),
		}
	}

	pub fn to_dto(&self) -> CountingTaskDto {
		CountingTaskDto {
			limit: self.limit,
			step_millis: self.step.as_millis() as u64,
		}
	}

	pub fn from_dto(dto: CountingTaskDto) -> Self {
		Self::new(dto.limit, Duration::from_millis(dto.step_millis))
	}
}

#[async_trait]
impl Task for CountingTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		for _ in 0..self.limit {
			check_interruption!(interrupter);

			interrupter.sleep(self.step).await?;
			self.count.fetch_add(1, Ordering::Relaxed);
		}

		Ok(TaskResult::Completed)
	}

	fn details(&self) -> Option<Arc<dyn AdditionalInformation>> {
		Some(Arc::new(CountingInformation {
			count: self.count.load(Ordering::Relaxed),
		}))
	}
}

/// Completes once its latch is released.
#[derive(Debug, Default)]
pub struct LatchTask {
	pub latch: Latch,
}

impl LatchTask {
	pub const TYPE: TaskType = TaskType::of("latch");
}

#[async_trait]
impl Task for LatchTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		interrupter.run_until_interrupted(self.latch.wait()).await?;

		Ok(TaskResult::Completed)
	}
}

/// Appends its label to a shared log when it starts.
#[derive(Debug)]
pub struct OrderedTask {
	pub label: u32,
	pub log: Arc<Mutex<Vec<u32>>>,
}

impl OrderedTask {
	pub const TYPE: TaskType = TaskType::of("ordered");
}

#[async_trait]
impl Task for OrderedTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		info!(label = self.label, "Running ordered task");
		self.log.lock().unwrap().push(self.label);

		interrupter.sleep(Duration::from_millis(10)).await?;

		Ok(TaskResult::Completed)
	}
}

/// Completes, but can't report its details.
#[derive(Debug, Default)]
pub struct BrokenDetailsTask {
	pub latch: Latch,
}

impl BrokenDetailsTask {
	pub const TYPE: TaskType = TaskType::of("broken-details");
}

#[async_trait]
impl Task for BrokenDetailsTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		interrupter.run_until_interrupted(self.latch.wait()).await?;

		Ok(TaskResult::Completed)
	}

	fn details(&self) -> Option<Arc<dyn AdditionalInformation>> {
		panic!("details are not available");
	}
}

/// Reports a snapshot nobody registered a codec for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportingTask {}

impl ReportingTask {
	pub const TYPE: TaskType = TaskType::of("reporting");
}

#[async_trait]
impl Task for ReportingTask {
	fn task_type(&self) -> TaskType {
		Self::TYPE
	}

	async fn run(&self, interrupter: &Interrupter) -> Result<TaskResult, RunError> {
		interrupter.sleep(Duration::from_millis(50)).await?;
		Ok(TaskResult::Completed)
	}

	fn details(&self) -> Option<Arc<dyn AdditionalInformation>> {
		Some(Arc::new(7_u64))
	}
}
