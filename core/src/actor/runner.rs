//! The operator runner
//!
//! Single-threaded command loop behind the [`Vzfs`](super::Vzfs) handle.
//! Commands execute one at a time in arrival order; after every command the
//! runner raises a prune self-event, so lock-table housekeeping rides along
//! between commands without ever blocking one.
//!
//! Every filesystem command follows the same sequence: resolve the target
//! paths, claim one lock, re-check the table for overlapping prefixes, run
//! the tree operation, then release the lock no matter how the operation
//! ended.

use super::message::{Ack, DirectoryRecord, Message};
use crate::config::VzfsConfig;
use crate::db::FsDatabase;
use crate::domain::FileRecord;
use crate::error::{Result, VzfsError};
use crate::{locks, path, tree};
use tokio::select;
use tracing::{debug, error, info, warn};

pub(super) struct Runner {
	config: VzfsConfig,
	fs: Option<FsDatabase>,
	cwd: Vec<String>,
	prune_tx: flume::Sender<Message>,
}

impl Runner {
	pub(super) async fn run(config: VzfsConfig, msgs_rx: flume::Receiver<Message>) {
		let (prune_tx, prune_rx) = flume::bounded(1);

		let mut runner = Self {
			config,
			fs: None,
			cwd: Vec::new(),
			prune_tx,
		};

		loop {
			let msg = select! {
				msg = msgs_rx.recv_async() => match msg {
					Ok(msg) => msg,
					// Every handle is gone; nothing can reach us again.
					Err(_) => break,
				},
				msg = prune_rx.recv_async() => match msg {
					Ok(msg) => msg,
					Err(_) => break,
				},
			};
			runner.dispatch(msg).await;
		}

		if let Some(fs) = runner.fs.take() {
			fs.close();
		}
	}

	async fn dispatch(&mut self, msg: Message) {
		match msg {
			Message::Init {
				fs_name,
				version,
				ack,
			} => {
				let result = self.init(&fs_name, version).await;
				reply(ack, result);
			}

			Message::ListFilesystems { ack } => {
				let result = self.list_filesystems();
				reply(ack, result);
			}

			Message::DropFilesystem { fs_name, ack } => {
				let result = self.drop_filesystem(&fs_name);
				reply(ack, result);
			}

			Message::RestoreFilesystemFromJson {
				fs_name,
				version,
				backup,
				ack,
			} => {
				let result = self.restore_filesystem(&fs_name, version, &backup).await;
				reply(ack, result);
			}

			Message::ChangeDirectory {
				new_directory_path,
				duration_ms,
				ack,
			} => {
				let result = self.change_directory(&new_directory_path, duration_ms).await;
				reply(ack, result);
			}

			Message::CreateFile {
				name,
				parent_path,
				content,
				duration_ms,
				ack,
			} => {
				let result = self
					.create_file(&name, &parent_path, &content, duration_ms)
					.await;
				reply(ack, result);
			}

			Message::ReadFile {
				path,
				duration_ms,
				ack,
			} => {
				let result = self.read_file(&path, duration_ms).await;
				reply(ack, result);
			}

			Message::UpdateFileTimestamp {
				path,
				duration_ms,
				ack,
			} => {
				let result = self.update_file_timestamp(&path, duration_ms).await;
				reply(ack, result);
			}

			Message::UpdateFileContent {
				path,
				content,
				duration_ms,
				ack,
			} => {
				let result = self.update_file_content(&path, &content, duration_ms).await;
				reply(ack, result);
			}

			Message::DeleteFile {
				path,
				duration_ms,
				ack,
			} => {
				let result = self.delete_file(&path, duration_ms).await;
				reply(ack, result);
			}

			Message::CreateDirectory {
				name,
				parent_path,
				duration_ms,
				ack,
			} => {
				let result = self.create_directory(&name, &parent_path, duration_ms).await;
				reply(ack, result);
			}

			Message::GetDirectoryRecord {
				path,
				duration_ms,
				ack,
			} => {
				let result = self.get_directory_record(path.as_deref(), duration_ms).await;
				reply(ack, result);
			}

			Message::EmptyDirectory {
				path,
				duration_ms,
				ack,
			} => {
				let result = self.empty_directory(&path, duration_ms).await;
				reply(ack, result);
			}

			Message::DeleteDirectoryIfEmpty {
				path,
				duration_ms,
				ack,
			} => {
				let result = self.delete_directory_if_empty(&path, duration_ms).await;
				reply(ack, result);
			}

			Message::RenameFile {
				path,
				new_name,
				duration_ms,
				ack,
			} => {
				let result = self.rename_file(&path, &new_name, duration_ms).await;
				reply(ack, result);
			}

			Message::MoveFile {
				path,
				new_parent_path,
				duration_ms,
				ack,
			} => {
				let result = self.move_file(&path, &new_parent_path, duration_ms).await;
				reply(ack, result);
			}

			Message::MoveDirectory {
				old_parent_path,
				new_parent_path,
				duration_ms,
				ack,
			} => {
				let result = self
					.move_directory(&old_parent_path, &new_parent_path, duration_ms)
					.await;
				reply(ack, result);
			}

			Message::RipFilesystemToJson { ack } => {
				let result = self.rip_filesystem().await;
				reply(ack, result);
			}

			Message::Close { ack } => {
				let result = self.close();
				reply(ack, result);
			}

			Message::PruneExpiredLocks => {
				self.prune().await;
				// Not a command; do not raise another prune event.
				return;
			}
		}

		// Back at awaiting-command: trigger the pruner region.
		self.raise_prune();
	}

	// --- lifecycle ---

	async fn init(&mut self, fs_name: &str, version: u32) -> Result<()> {
		if self.fs.is_some() {
			return Err(VzfsError::AlreadyInitialized);
		}
		let fs = FsDatabase::init(&self.config, fs_name, version).await?;
		info!(filesystem = fs_name, "filesystem initialized");
		self.fs = Some(fs);
		self.cwd = Vec::new();
		Ok(())
	}

	fn list_filesystems(&self) -> Result<Vec<String>> {
		if self.fs.is_some() {
			return Err(VzfsError::AlreadyInitialized);
		}
		Ok(FsDatabase::list_filesystems(&self.config))
	}

	fn drop_filesystem(&self, fs_name: &str) -> Result<()> {
		if self.fs.is_some() {
			return Err(VzfsError::AlreadyInitialized);
		}
		FsDatabase::drop_filesystem(&self.config, fs_name)?;
		Ok(())
	}

	async fn restore_filesystem(&self, fs_name: &str, version: u32, backup: &str) -> Result<()> {
		if self.fs.is_some() {
			return Err(VzfsError::AlreadyInitialized);
		}
		let fs = FsDatabase::restore_from_json(&self.config, fs_name, version, backup).await?;
		fs.close();
		Ok(())
	}

	async fn rip_filesystem(&self) -> Result<String> {
		let fs = self.fs()?;
		Ok(fs.rip_to_json().await?)
	}

	fn close(&mut self) -> Result<()> {
		let fs = self.fs.take().ok_or(VzfsError::NotInitialized)?;
		info!(filesystem = fs.name(), "filesystem closed");
		fs.close();
		self.cwd = Vec::new();
		Ok(())
	}

	// --- filesystem commands ---

	async fn change_directory(
		&mut self,
		new_directory_path: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		let fs = self.fs()?;
		let entity = tree::get_entity(fs, &self.cwd, new_directory_path).await?;
		if entity.is_leaf {
			return Err(VzfsError::NotADirectory(entity.path));
		}

		let lock = self.acquire(&entity.path, duration_ms).await?;
		// Re-validate under the lock: a sibling actor may have removed the
		// directory between resolution and acquisition.
		let result = tree::get_entity(fs, &self.cwd, &entity.path).await;
		self.release(&lock).await;

		let entity = result?;
		self.cwd = path::abs_path_to_pieces(&entity.path);
		Ok(path::pieces_to_path(&self.cwd))
	}

	async fn create_file(
		&self,
		name: &str,
		parent_path: &str,
		content: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		let fs = self.fs()?;
		let parent = tree::get_entity(fs, &self.cwd, parent_path).await?;

		let lock = self.acquire(&parent.path, duration_ms).await?;
		let result = tree::add_file_entity(fs, &self.cwd, name, &parent.path, content).await;
		self.release(&lock).await;

		result.map(|entity| entity.path)
	}

	async fn read_file(&self, target: &str, duration_ms: Option<i64>) -> Result<FileRecord> {
		let fs = self.fs()?;
		let entity = tree::get_entity(fs, &self.cwd, target).await?;

		let lock = self.acquire(&entity.path, duration_ms).await?;
		let result = match tree::get_entity(fs, &self.cwd, &entity.path).await {
			Ok(entity) => tree::join_content_to_leaf(fs, &entity).await,
			Err(e) => Err(e),
		};
		self.release(&lock).await;

		result
	}

	async fn update_file_timestamp(&self, target: &str, duration_ms: Option<i64>) -> Result<()> {
		let fs = self.fs()?;
		let entity = tree::get_entity(fs, &self.cwd, target).await?;

		let lock = self.acquire(&entity.path, duration_ms).await?;
		let result = tree::update_file_timestamp(fs, &self.cwd, &entity.path).await;
		self.release(&lock).await;

		result.map(|_| ())
	}

	async fn update_file_content(
		&self,
		target: &str,
		content: &str,
		duration_ms: Option<i64>,
	) -> Result<()> {
		let fs = self.fs()?;
		let entity = tree::get_entity(fs, &self.cwd, target).await?;

		let lock = self.acquire(&entity.path, duration_ms).await?;
		let result = tree::update_file(fs, &self.cwd, &entity.path, content).await;
		self.release(&lock).await;

		result.map(|_| ())
	}

	async fn delete_file(&self, target: &str, duration_ms: Option<i64>) -> Result<()> {
		let fs = self.fs()?;
		let entity = tree::get_entity(fs, &self.cwd, target).await?;

		let lock = self.acquire(&entity.path, duration_ms).await?;
		let result = tree::delete_leaf_entity(fs, &self.cwd, &entity.path).await;
		self.release(&lock).await;

		result.map(|_| ())
	}

	async fn create_directory(
		&self,
		name: &str,
		parent_path: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		let fs = self.fs()?;
		let parent = tree::get_entity(fs, &self.cwd, parent_path).await?;

		let lock = self.acquire(&parent.path, duration_ms).await?;
		let result = tree::add_directory_entity(fs, &self.cwd, name, &parent.path).await;
		self.release(&lock).await;

		result.map(|entity| entity.path)
	}

	async fn get_directory_record(
		&self,
		target: Option<&str>,
		duration_ms: Option<i64>,
	) -> Result<DirectoryRecord> {
		let fs = self.fs()?;
		let resolved = match target {
			Some(target) => tree::get_entity(fs, &self.cwd, target).await?.path,
			None => path::pieces_to_path(&self.cwd),
		};

		let lock = self.acquire(&resolved, duration_ms).await?;
		let result = async {
			let entity = tree::get_entity(fs, &self.cwd, &resolved).await?;
			let child_keys = tree::get_immediate_child_keys(fs, &self.cwd, &entity.path).await?;
			Ok(DirectoryRecord {
				entity,
				child_keys,
				cwd: path::pieces_to_path(&self.cwd),
			})
		}
		.await;
		self.release(&lock).await;

		result
	}

	async fn empty_directory(&self, target: &str, duration_ms: Option<i64>) -> Result<()> {
		let fs = self.fs()?;
		let entity = tree::get_entity(fs, &self.cwd, target).await?;

		let lock = self.acquire(&entity.path, duration_ms).await?;
		let result = tree::empty_directory(fs, &self.cwd, &entity.path).await;
		self.release(&lock).await;

		result.map(|_| ())
	}

	async fn delete_directory_if_empty(
		&self,
		target: &str,
		duration_ms: Option<i64>,
	) -> Result<()> {
		let fs = self.fs()?;
		let entity = tree::get_entity(fs, &self.cwd, target).await?;

		let lock = self.acquire(&entity.path, duration_ms).await?;
		let result = tree::delete_directory_if_empty(fs, &self.cwd, &entity.path).await;
		self.release(&lock).await;

		result.map(|_| ())
	}

	async fn rename_file(
		&self,
		target: &str,
		new_name: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		let fs = self.fs()?;
		let entity = tree::get_entity(fs, &self.cwd, target).await?;
		if !entity.is_leaf {
			return Err(VzfsError::NotALeaf(entity.path));
		}
		let (_, new_path) = tree::rename_destination(fs, &self.cwd, &entity, new_name).await?;

		// One lock covers both the old and the new location.
		let prefix = path::greatest_common_prefix(&entity.path, &new_path);
		let lock = self.acquire(&prefix, duration_ms).await?;
		let result = tree::rename_file(fs, &self.cwd, &entity.path, new_name).await;
		self.release(&lock).await;

		result.map(|entity| entity.path)
	}

	async fn move_file(
		&self,
		target: &str,
		new_parent_path: &str,
		duration_ms: Option<i64>,
	) -> Result<String> {
		let fs = self.fs()?;
		let entity = tree::get_entity(fs, &self.cwd, target).await?;
		if !entity.is_leaf {
			return Err(VzfsError::NotALeaf(entity.path));
		}
		let (_, new_path) = tree::reparent_destination(fs, &self.cwd, &entity, new_parent_path).await?;

		let prefix = path::greatest_common_prefix(&entity.path, &new_path);
		let lock = self.acquire(&prefix, duration_ms).await?;
		let result = tree::reparent_leaf(fs, &self.cwd, &entity.path, new_parent_path).await;
		self.release(&lock).await;

		result.map(|entity| entity.path)
	}

	async fn move_directory(
		&self,
		old_parent_path: &str,
		new_parent_path: &str,
		duration_ms: Option<i64>,
	) -> Result<()> {
		let fs = self.fs()?;
		let old_parent = tree::get_entity(fs, &self.cwd, old_parent_path).await?;
		let new_parent = tree::get_entity(fs, &self.cwd, new_parent_path).await?;

		let prefix = path::greatest_common_prefix(&old_parent.path, &new_parent.path);
		let lock = self.acquire(&prefix, duration_ms).await?;
		let result =
			tree::transplant_ancestors(fs, &self.cwd, &old_parent.path, &new_parent.path).await;
		self.release(&lock).await;

		result.map(|_| ())
	}

	// --- locking ---

	fn fs(&self) -> Result<&FsDatabase> {
		self.fs.as_ref().ok_or(VzfsError::NotInitialized)
	}

	/// Claim the lock for one command, then re-read the table to catch an
	/// ancestor prefix held by another actor. On overlap the fresh claim is
	/// released before the contention failure surfaces.
	async fn acquire(&self, target: &str, duration_ms: Option<i64>) -> Result<String> {
		let fs = self.fs()?;
		let duration = duration_ms.unwrap_or(self.config.default_lock_duration_ms);
		let prefix = locks::lock_path(fs, &self.cwd, target, duration).await?;

		if let Err(e) = locks::reject_if_conflicting_prefixes(fs, &[prefix.as_str()], true).await {
			locks::remove_lock(fs, &prefix).await;
			return Err(e);
		}
		Ok(prefix)
	}

	/// Guaranteed-final release. Failures are already swallowed inside
	/// [`locks::remove_lock`]; a command's outcome never depends on it.
	async fn release(&self, prefix: &str) {
		match self.fs() {
			Ok(fs) => {
				locks::remove_lock(fs, prefix).await;
			}
			Err(_) => warn!(prefix, "lock release skipped, filesystem closed"),
		}
	}

	// --- pruner region ---

	fn raise_prune(&self) {
		// A full slot means a prune is already queued.
		let _ = self.prune_tx.try_send(Message::PruneExpiredLocks);
	}

	async fn prune(&self) {
		let Some(fs) = self.fs.as_ref() else {
			return;
		};
		match locks::prune_expired_locks(fs).await {
			Ok(0) => {}
			Ok(pruned) => debug!(pruned, "lock pruner removed expired locks"),
			// The pruner swallows its own failures and goes back to idle.
			Err(e) => error!("lock pruner failed: {e}"),
		}
	}
}

fn reply<T>(ack: Ack<T>, result: Result<T>) {
	if ack.send(result).is_err() {
		error!("failed to send command reply, receiver dropped");
	}
}
