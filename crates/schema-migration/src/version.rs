use std::fmt;

use serde::{Deserialize, Serialize};

/// Version of the persisted schema, versions only go up one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(u32);

impl SchemaVersion {
	/// The version of a store that never recorded one.
	pub const INITIAL: Self = Self(1);

	#[must_use]
	pub const fn new(version: u32) -> Self {
		Self(version)
	}

	#[must_use]
	pub const fn value(self) -> u32 {
		self.0
	}

	#[must_use]
	pub const fn next(self) -> Self {
		Self(self.0 + 1)
	}
}

impl fmt::Display for SchemaVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A single step upgrade, from the previous version to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaTransition {
	pub from: SchemaVersion,
	pub to: SchemaVersion,
}

impl SchemaTransition {
	#[must_use]
	pub const fn to(to: SchemaVersion) -> Self {
		Self {
			from: SchemaVersion(to.0.saturating_sub(1)),
			to,
		}
	}

	#[must_use]
	pub const fn after(from: SchemaVersion) -> Self {
		Self {
			from,
			to: from.next(),
		}
	}

	/// Every step needed to go from `current` to `target`, none when already there.
	pub fn path(current: SchemaVersion, target: SchemaVersion) -> impl Iterator<Item = Self> {
		(current.0..target.0).map(|from| Self::after(SchemaVersion(from)))
	}
}

impl fmt::Display for SchemaTransition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} -> {}", self.from, self.to)
	}
}
