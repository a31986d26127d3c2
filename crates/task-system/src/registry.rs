//! Serialization of tasks and additional information across nodes.
//!
//! Every serialized value is a JSON object carrying a `type` discriminator, the registry
//! dispatches on it to find the module able to rebuild the value.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::task::{AdditionalInformation, Task, TaskType};

const TYPE_FIELD: &str = "type";

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("no module registered for task type '{0}'")]
	UnknownTaskType(TaskType),
	#[error("serialized {0} has no 'type' discriminator")]
	MissingType(&'static str),
	#[error("serialized {0} must be a JSON object")]
	NotAnObject(&'static str),
	#[error("value given for task type '{0}' is not the registered implementation")]
	TypeMismatch(TaskType),
	#[error("failed to (de)serialize {kind} of type '{task_type}': {source}")]
	Serde {
		kind: &'static str,
		task_type: TaskType,
		#[source]
		source: serde_json::Error,
	},
}

type EncodeFn<T> = Box<dyn Fn(&T) -> Result<Value, RegistryError> + Send + Sync>;
type DecodeFn<T> = Box<dyn Fn(Value) -> Result<Arc<T>, RegistryError> + Send + Sync>;

struct Codec<T: ?Sized> {
	encode: EncodeFn<T>,
	decode: DecodeFn<T>,
}

impl<T: ?Sized + 'static> Codec<T> {
	fn new<C, Dto>(
		kind: &'static str,
		task_type: &TaskType,
		downcast: fn(&T) -> Option<&C>,
		upcast: fn(C) -> Arc<T>,
		to_dto: impl Fn(&C) -> Dto + Send + Sync + 'static,
		from_dto: impl Fn(Dto) -> C + Send + Sync + 'static,
	) -> Self
	where
		C: 'static,
		Dto: Serialize + DeserializeOwned,
	{
		let encode_type = task_type.clone();
		let decode_type = task_type.clone();

		Self {
			encode: Box::new(move |value: &T| {
				let concrete =
					downcast(value).ok_or_else(|| RegistryError::TypeMismatch(encode_type.clone()))?;

				match serde_json::to_value(to_dto(concrete)) {
					Ok(Value::Object(mut map)) => {
						map.insert(TYPE_FIELD.to_string(), encode_type.as_str().into());
						Ok(Value::Object(map))
					}
					Ok(_) => Err(RegistryError::NotAnObject(kind)),
					Err(source) => Err(RegistryError::Serde {
						kind,
						task_type: encode_type.clone(),
						source,
					}),
				}
			}),
			decode: Box::new(move |value: Value| {
				serde_json::from_value::<Dto>(value)
					.map(|dto| upcast(from_dto(dto)))
					.map_err(|source| RegistryError::Serde {
						kind,
						task_type: decode_type.clone(),
						source,
					})
			}),
		}
	}
}

/// Knows how to (de)serialize one kind of [`Task`].
pub struct TaskModule {
	task_type: TaskType,
	codec: Codec<dyn Task>,
}

impl TaskModule {
	/// A module going through a dedicated DTO, which keeps the wire format independent from
	/// the task internals.
	pub fn new<T, Dto>(
		task_type: TaskType,
		to_dto: impl Fn(&T) -> Dto + Send + Sync + 'static,
		from_dto: impl Fn(Dto) -> T + Send + Sync + 'static,
	) -> Self
	where
		T: Task,
		Dto: Serialize + DeserializeOwned,
	{
		let codec = Codec::<dyn Task>::new(
			"task",
			&task_type,
			|task: &dyn Task| task.downcast_ref::<T>(),
			|task: T| Arc::new(task) as Arc<dyn Task>,
			to_dto,
			from_dto,
		);

		Self { task_type, codec }
	}

	/// A module for tasks that are their own DTO.
	pub fn serde<T>(task_type: TaskType) -> Self
	where
		T: Task + Clone + Serialize + DeserializeOwned,
	{
		Self::new(task_type, T::clone, |task: T| task)
	}

	#[must_use]
	pub const fn task_type(&self) -> &TaskType {
		&self.task_type
	}
}

impl fmt::Debug for TaskModule {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TaskModule")
			.field("task_type", &self.task_type)
			.finish_non_exhaustive()
	}
}

/// Knows how to (de)serialize the [`AdditionalInformation`] reported by one kind of task.
pub struct InformationModule {
	task_type: TaskType,
	codec: Codec<dyn AdditionalInformation>,
}

impl InformationModule {
	pub fn new<I, Dto>(
		task_type: TaskType,
		to_dto: impl Fn(&I) -> Dto + Send + Sync + 'static,
		from_dto: impl Fn(Dto) -> I + Send + Sync + 'static,
	) -> Self
	where
		I: AdditionalInformation,
		Dto: Serialize + DeserializeOwned,
	{
		let codec = Codec::<dyn AdditionalInformation>::new(
			"additional information",
			&task_type,
			|information: &dyn AdditionalInformation| information.downcast_ref::<I>(),
			|information: I| Arc::new(information) as Arc<dyn AdditionalInformation>,
			to_dto,
			from_dto,
		);

		Self { task_type, codec }
	}

	pub fn serde<I>(task_type: TaskType) -> Self
	where
		I: AdditionalInformation + Clone + Serialize + DeserializeOwned,
	{
		Self::new(task_type, I::clone, |information: I| information)
	}
}

impl fmt::Debug for InformationModule {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InformationModule")
			.field("task_type", &self.task_type)
			.finish_non_exhaustive()
	}
}

/// Every task kind a cluster knows how to ship around, all nodes need the same registry.
#[derive(Debug, Default)]
pub struct TaskRegistry {
	tasks: HashMap<TaskType, TaskModule>,
	information: HashMap<TaskType, InformationModule>,
}

impl TaskRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_task(mut self, module: TaskModule) -> Self {
		self.tasks.insert(module.task_type.clone(), module);
		self
	}

	#[must_use]
	pub fn with_information(mut self, module: InformationModule) -> Self {
		self.information.insert(module.task_type.clone(), module);
		self
	}

	pub fn encode_task(&self, task: &dyn Task) -> Result<Value, RegistryError> {
		let task_type = task.task_type();

		let module = self
			.tasks
			.get(&task_type)
			.ok_or(RegistryError::UnknownTaskType(task_type))?;

		(module.codec.encode)(task)
	}

	pub fn decode_task(&self, value: Value) -> Result<Arc<dyn Task>, RegistryError> {
		let (task_type, value) = discriminate("task", value)?;

		let module = self
			.tasks
			.get(&task_type)
			.ok_or(RegistryError::UnknownTaskType(task_type))?;

		(module.codec.decode)(value)
	}

	/// The information reported by a task is registered under the type of that task.
	pub fn encode_information(
		&self,
		task_type: &TaskType,
		information: &dyn AdditionalInformation,
	) -> Result<Value, RegistryError> {
		let module = self
			.information
			.get(task_type)
			.ok_or_else(|| RegistryError::UnknownTaskType(task_type.clone()))?;

		(module.codec.encode)(information)
	}

	pub fn decode_information(
		&self,
		value: Value,
	) -> Result<Arc<dyn AdditionalInformation>, RegistryError> {
		let (task_type, value) = discriminate("additional information", value)?;

		let module = self
			.information
			.get(&task_type)
			.ok_or(RegistryError::UnknownTaskType(task_type))?;

		(module.codec.decode)(value)
	}
}

/// Splits the discriminator from a serialized value, the rest is handed to the DTO.
fn discriminate(kind: &'static str, value: Value) -> Result<(TaskType, Value), RegistryError> {
	let Value::Object(mut map) = value else {
		return Err(RegistryError::NotAnObject(kind));
	};

	match map.remove(TYPE_FIELD) {
		Some(Value::String(task_type)) => Ok((TaskType::from(task_type), Value::Object(map))),
		_ => Err(RegistryError::MissingType(kind)),
	}
}

/// The discriminator of a serialized task, without decoding it.
pub fn task_type_of(value: &Value) -> Result<TaskType, RegistryError> {
	value
		.as_object()
		.ok_or(RegistryError::NotAnObject("task"))?
		.get(TYPE_FIELD)
		.and_then(Value::as_str)
		.map(|task_type| TaskType::from(task_type.to_string()))
		.ok_or(RegistryError::MissingType("task"))
}
