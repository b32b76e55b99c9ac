//! The filesystem actor
//!
//! [`Vzfs`] is the public handle: a cheap clone around the mailbox of a
//! background runner that executes one command at a time. Each method sends
//! one typed command and awaits its reply through a dedicated oneshot; the
//! runner answers in arrival order.
//!
//! A handle starts uninitialized. Database-level commands
//! ([`list_filesystems`](Vzfs::list_filesystems),
//! [`drop_filesystem`](Vzfs::drop_filesystem),
//! [`restore_filesystem_from_json`](Vzfs::restore_filesystem_from_json))
//! only run in that state; everything else requires [`init`](Vzfs::init)
//! first, and [`close`](Vzfs::close) returns to uninitialized.

mod message;
mod runner;

pub use message::DirectoryRecord;

use crate::config::VzfsConfig;
use crate::domain::FileRecord;
use crate::error::Result;
use message::Message;
use runner::Runner;
use tokio::spawn;
use tokio::sync::oneshot;
use tracing::error;

#[derive(Debug, Clone)]
pub struct Vzfs {
	tx: flume::Sender<Message>,
}

impl Vzfs {
	/// Spawn a new actor. The runner task lives until every handle clone is
	/// dropped and is restarted if a command body panics.
	pub fn new(config: VzfsConfig) -> Self {
		let (tx, rx) = flume::bounded(8);

		spawn(async move {
			while let Err(e) = spawn(Runner::run(config.clone(), rx.clone())).await {
				if e.is_panic() {
					if let Some(msg) = e.into_panic().downcast_ref::<&str>() {
						error!(?msg, "panic in filesystem runner!");
					} else {
						error!("unknown panic in filesystem runner!");
					}
				}
			}
		});

		Self { tx }
	}

	async fn request<T>(&self, make: impl FnOnce(message::Ack<T>) -> Message) -> Result<T> {
		let (ack, rx) = oneshot::channel();
		self.tx
			.send_async(make(ack))
			.await
			.expect("filesystem actor channel closed");
		rx.await.expect("filesystem actor channel closed")
	}

	/// Open or create the named filesystem and make it current.
	pub async fn init(&self, fs_name: &str, version: u32) -> Result<()> {
		self.request(|ack| Message::Init {
			fs_name: fs_name.to_string(),
			version,
			ack,
		})
		.await
	}

	/// Names of the filesystems in the data directory. Uninitialized only.
	pub async fn list_filesystems(&self) -> Result<Vec<String>> {
		self.request(|ack| Message::ListFilesystems { ack }).await
	}

	/// Delete a filesystem database. Uninitialized only.
	pub async fn drop_filesystem(&self, fs_name: &str) -> Result<()> {
		self.request(|ack| Message::DropFilesystem {
			fs_name: fs_name.to_string(),
			ack,
		})
		.await
	}

	/// Create a fresh filesystem from a backup document. Uninitialized
	/// only; never merges into an existing database.
	pub async fn restore_filesystem_from_json(
		&self,
		fs_name: &str,
		version: u32,
		backup: &str,
	) -> Result<()> {
		self.request(|ack| Message::RestoreFilesystemFromJson {
			fs_name: fs_name.to_string(),
			version,
			backup: backup.to_string(),
			ack,
		})
		.await
	}

	/// Change the actor's in-memory working directory, returning the new
	/// canonical cwd. Nothing is persisted; sibling actors keep their own.
	pub async fn change_directory(
		&self,
		new_directory_path: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		self.request(|ack| Message::ChangeDirectory {
			new_directory_path: new_directory_path.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Create a file under `parent_path`, returning its canonical path.
	pub async fn create_file(
		&self,
		name: &str,
		parent_path: &str,
		content: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		self.request(|ack| Message::CreateFile {
			name: name.to_string(),
			parent_path: parent_path.to_string(),
			content: content.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Read an entity joined with its content.
	pub async fn read_file(&self, path: &str, duration_ms: Option<i64>) -> Result<FileRecord> {
		self.request(|ack| Message::ReadFile {
			path: path.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Bump a file's modification time without touching its body.
	pub async fn update_file_timestamp(
		&self,
		path: &str,
		duration_ms: Option<i64>,
	) -> Result<()> {
		self.request(|ack| Message::UpdateFileTimestamp {
			path: path.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Replace a file's body.
	pub async fn update_file_content(
		&self,
		path: &str,
		content: &str,
		duration_ms: Option<i64>,
	) -> Result<()> {
		self.request(|ack| Message::UpdateFileContent {
			path: path.to_string(),
			content: content.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Delete a file and its content.
	pub async fn delete_file(&self, path: &str, duration_ms: Option<i64>) -> Result<()> {
		self.request(|ack| Message::DeleteFile {
			path: path.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Create a directory under `parent_path`, returning its canonical path.
	pub async fn create_directory(
		&self,
		name: &str,
		parent_path: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		self.request(|ack| Message::CreateDirectory {
			name: name.to_string(),
			parent_path: parent_path.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// List a directory. With no path the actor's working directory is
	/// listed instead.
	pub async fn get_directory_record(
		&self,
		path: Option<&str>,
		duration_ms: Option<i64>,
	) -> Result<DirectoryRecord> {
		self.request(|ack| Message::GetDirectoryRecord {
			path: path.map(str::to_string),
			duration_ms,
			ack,
		})
		.await
	}

	/// Delete everything below a directory, keeping the directory.
	pub async fn empty_directory(&self, path: &str, duration_ms: Option<i64>) -> Result<()> {
		self.request(|ack| Message::EmptyDirectory {
			path: path.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Delete a directory that has no children.
	pub async fn delete_directory_if_empty(
		&self,
		path: &str,
		duration_ms: Option<i64>,
	) -> Result<()> {
		self.request(|ack| Message::DeleteDirectoryIfEmpty {
			path: path.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Rename a file in place, returning its new canonical path.
	pub async fn rename_file(
		&self,
		path: &str,
		new_name: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		self.request(|ack| Message::RenameFile {
			path: path.to_string(),
			new_name: new_name.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Move a file under another directory, returning its new canonical
	/// path.
	pub async fn move_file(
		&self,
		path: &str,
		new_parent_path: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		self.request(|ack| Message::MoveFile {
			path: path.to_string(),
			new_parent_path: new_parent_path.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Move every child of one directory under another.
	pub async fn move_directory(
		&self,
		old_parent_path: &str,
		new_parent_path: &str,
		duration_ms: Option<i64>,
	) -> Result<()> {
		self.request(|ack| Message::MoveDirectory {
			old_parent_path: old_parent_path.to_string(),
			new_parent_path: new_parent_path.to_string(),
			duration_ms,
			ack,
		})
		.await
	}

	/// Export the whole filesystem as one JSON document.
	pub async fn rip_filesystem_to_json(&self) -> Result<String> {
		self.request(|ack| Message::RipFilesystemToJson { ack }).await
	}

	/// Close the current filesystem, returning the actor to its
	/// uninitialized state.
	pub async fn close(&self) -> Result<()> {
		self.request(|ack| Message::Close { ack }).await
	}
}
