//! Actor configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default lifetime of a path lock when the command does not supply one.
pub const DEFAULT_LOCK_DURATION_MS: i64 = 5000;

/// Configuration shared by every actor in a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VzfsConfig {
	/// Directory holding one database file per filesystem
	pub data_dir: PathBuf,

	/// Lock lifetime applied when a command carries no explicit duration
	#[serde(default = "default_lock_duration_ms")]
	pub default_lock_duration_ms: i64,
}

fn default_lock_duration_ms() -> i64 {
	DEFAULT_LOCK_DURATION_MS
}

impl VzfsConfig {
	pub fn new(data_dir: impl AsRef<Path>) -> Self {
		Self {
			data_dir: data_dir.as_ref().to_path_buf(),
			default_lock_duration_ms: DEFAULT_LOCK_DURATION_MS,
		}
	}
}
