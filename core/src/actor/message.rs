//! Actor mailbox messages

use crate::domain::FileRecord;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

pub(crate) type Ack<T> = oneshot::Sender<Result<T>>;

/// A directory listing as returned by `getDirectoryRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRecord {
	/// The directory's own entity
	pub entity: crate::domain::Entity,

	/// Primary keys of the direct children, ascending
	pub child_keys: Vec<String>,

	/// The actor's working directory at the time of the listing
	pub cwd: String,
}

/// One command (or the pruner self-event) consumed by the runner.
pub(crate) enum Message {
	Init {
		fs_name: String,
		version: u32,
		ack: Ack<()>,
	},
	ListFilesystems {
		ack: Ack<Vec<String>>,
	},
	DropFilesystem {
		fs_name: String,
		ack: Ack<()>,
	},
	RestoreFilesystemFromJson {
		fs_name: String,
		version: u32,
		backup: String,
		ack: Ack<()>,
	},
	ChangeDirectory {
		new_directory_path: String,
		duration_ms: Option<i64>,
		ack: Ack<String>,
	},
	CreateFile {
		name: String,
		parent_path: String,
		content: String,
		duration_ms: Option<i64>,
		ack: Ack<String>,
	},
	ReadFile {
		path: String,
		duration_ms: Option<i64>,
		ack: Ack<FileRecord>,
	},
	UpdateFileTimestamp {
		path: String,
		duration_ms: Option<i64>,
		ack: Ack<()>,
	},
	UpdateFileContent {
		path: String,
		content: String,
		duration_ms: Option<i64>,
		ack: Ack<()>,
	},
	DeleteFile {
		path: String,
		duration_ms: Option<i64>,
		ack: Ack<()>,
	},
	CreateDirectory {
		name: String,
		parent_path: String,
		duration_ms: Option<i64>,
		ack: Ack<String>,
	},
	GetDirectoryRecord {
		path: Option<String>,
		duration_ms: Option<i64>,
		ack: Ack<DirectoryRecord>,
	},
	EmptyDirectory {
		path: String,
		duration_ms: Option<i64>,
		ack: Ack<()>,
	},
	DeleteDirectoryIfEmpty {
		path: String,
		duration_ms: Option<i64>,
		ack: Ack<()>,
	},
	RenameFile {
		path: String,
		new_name: String,
		duration_ms: Option<i64>,
		ack: Ack<String>,
	},
	MoveFile {
		path: String,
		new_parent_path: String,
		duration_ms: Option<i64>,
		ack: Ack<String>,
	},
	MoveDirectory {
		old_parent_path: String,
		new_parent_path: String,
		duration_ms: Option<i64>,
		ack: Ack<()>,
	},
	RipFilesystemToJson {
		ack: Ack<String>,
	},
	Close {
		ack: Ack<()>,
	},
	/// Self-raised after every command returns the runner to its waiting
	/// state; drives the lock-pruner region.
	PruneExpiredLocks,
}
