use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::task::TaskId;

use super::{EventJournal, JournalError};

#[derive(Debug, Default)]
struct Histories {
	records: HashMap<TaskId, Vec<String>>,
	order: Vec<TaskId>,
}

/// An in-process [`EventJournal`], nodes of a test cluster share it through an `Arc`.
///
/// Records are kept serialized, so nothing but JSON survives between writers and readers.
#[derive(Debug, Default)]
pub struct MemoryEventJournal {
	histories: RwLock<Histories>,
}

impl MemoryEventJournal {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl EventJournal for MemoryEventJournal {
	async fn append(
		&self,
		aggregate: TaskId,
		expected_len: usize,
		records: Vec<Value>,
	) -> Result<(), JournalError> {
		let serialized = records
			.iter()
			.map(serde_json::to_string)
			.collect::<Result<Vec<_>, _>>()?;

		let mut histories = self.histories.write().await;
		let Histories {
			records: by_task,
			order,
		} = &mut *histories;

		let history = by_task.entry(aggregate).or_default();
		if history.len() != expected_len {
			return Err(JournalError::Conflict {
				aggregate,
				expected: expected_len,
				actual: history.len(),
			});
		}

		if history.is_empty() {
			order.push(aggregate);
		}
		history.extend(serialized);

		Ok(())
	}

	async fn load(&self, aggregate: TaskId) -> Result<Vec<Value>, JournalError> {
		self.histories
			.read()
			.await
			.records
			.get(&aggregate)
			.map_or_else(
				|| Ok(Vec::new()),
				|history| {
					history
						.iter()
						.map(|record| serde_json::from_str(record).map_err(Into::into))
						.collect()
				},
			)
	}

	async fn aggregates(&self) -> Result<Vec<TaskId>, JournalError> {
		Ok(self.histories.read().await.order.clone())
	}
}
