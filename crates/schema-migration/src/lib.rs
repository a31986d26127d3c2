//!
//! # Schema Migration
//!
//! Upgrades a persisted schema through a chain of registered [`Migration`]s, running the whole
//! upgrade as a single cancellable task of the task system.
//!

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

mod error;
mod service;
mod store;
mod task;
mod version;

pub use error::MigrationError;
pub use service::{Migration, MigrationService};
pub use store::{MemorySchemaVersionStore, SchemaVersionStore};
pub use task::{MigrationInformation, MigrationTask};
pub use version::{SchemaTransition, SchemaVersion};
