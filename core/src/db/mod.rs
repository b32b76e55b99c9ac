//! Filesystem database lifecycle
//!
//! Each filesystem is an independently named database file under the
//! configured data directory. Opening one creates the object stores and
//! index tables on demand, records the schema version, and seeds the root
//! directory. Independent actors in the same process that open the same
//! filesystem share one underlying database handle through a process-wide
//! registry, which is what lets their transactions interleave the way the
//! lock table exists to police.

pub mod backup;
pub mod store;
pub mod tables;

use crate::config::VzfsConfig;
use crate::domain::Entity;
use once_cell::sync::Lazy;
use redb::{Database, ReadableTable};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced by the store engine and its thin wrappers.
///
/// `Constraint` is the load-bearing variant: callers use it to tell
/// "already exists" apart from an I/O failure, both for entity uniqueness
/// and for lock contention.
#[derive(Error, Debug)]
pub enum StoreError {
	#[error("unique constraint violated on {index}: {key}")]
	Constraint { index: &'static str, key: String },

	#[error("database error: {0}")]
	Database(#[from] redb::DatabaseError),

	#[error("transaction error: {0}")]
	Transaction(#[from] redb::TransactionError),

	#[error("table error: {0}")]
	Table(#[from] redb::TableError),

	#[error("storage error: {0}")]
	Storage(#[from] redb::StorageError),

	#[error("commit error: {0}")]
	Commit(#[from] redb::CommitError),

	#[error("record encoding error: {0}")]
	Encode(#[from] rmp_serde::encode::Error),

	#[error("record decoding error: {0}")]
	Decode(#[from] rmp_serde::decode::Error),

	#[error("backup serialization error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("filesystem {0} is currently open")]
	Busy(String),

	#[error("filesystem {0} already exists")]
	DatabaseExists(String),

	#[error("schema version {requested} is older than the stored version {stored}")]
	Version { requested: u32, stored: u32 },
}

/// Open database handles shared across actors in this process, keyed by the
/// database file path.
static OPEN_DATABASES: Lazy<Mutex<HashMap<PathBuf, Weak<Database>>>> =
	Lazy::new(|| Mutex::new(HashMap::new()));

/// One open filesystem database.
pub struct FsDatabase {
	name: String,
	file_path: PathBuf,
	db: Arc<Database>,
}

impl FsDatabase {
	/// Open or create the filesystem `name`, upgrading its schema to
	/// `version` and seeding the root directory.
	///
	/// A root that already exists surfaces as a constraint collision on the
	/// seed insert and counts as success.
	pub async fn init(config: &VzfsConfig, name: &str, version: u32) -> Result<Self, StoreError> {
		let fs = Self::open_raw(config, name)?;
		fs.ensure_schema(version)?;

		match fs.insert_entity(&Entity::root()).await {
			Ok(()) => info!(filesystem = name, "seeded root directory"),
			Err(StoreError::Constraint { .. }) => {
				debug!(filesystem = name, "root directory already seeded")
			}
			Err(e) => return Err(e),
		}

		Ok(fs)
	}

	/// Open or create the database file without touching the schema.
	fn open_raw(config: &VzfsConfig, name: &str) -> Result<Self, StoreError> {
		std::fs::create_dir_all(&config.data_dir)?;
		let file_path = Self::file_path(config, name);

		let mut registry = OPEN_DATABASES.lock().expect("registry mutex poisoned");
		let db = match registry.get(&file_path).and_then(Weak::upgrade) {
			Some(db) => db,
			None => {
				let db = Arc::new(Database::create(&file_path)?);
				registry.insert(file_path.clone(), Arc::downgrade(&db));
				db
			}
		};

		Ok(Self {
			name: name.to_string(),
			file_path,
			db,
		})
	}

	/// Create every table and record the schema version, refusing to open a
	/// database whose stored version is newer than `version`.
	fn ensure_schema(&self, version: u32) -> Result<(), StoreError> {
		let txn = self.db.begin_write()?;
		{
			txn.open_table(tables::ENTITY)?;
			txn.open_table(tables::CONTENT)?;
			txn.open_table(tables::LOCK)?;
			txn.open_multimap_table(tables::ENTITY_BY_NAME)?;
			txn.open_multimap_table(tables::ENTITY_BY_PARENT)?;
			txn.open_multimap_table(tables::ENTITY_BY_CREATED)?;
			txn.open_multimap_table(tables::ENTITY_BY_UPDATED)?;
			txn.open_table(tables::ENTITY_BY_PARENT_NAME)?;
			txn.open_multimap_table(tables::LOCK_BY_EXPIRY)?;
			txn.open_multimap_table(tables::LOCK_BY_CREATED)?;

			let mut meta = txn.open_table(tables::META)?;
			let stored = meta
				.get(tables::META_SCHEMA_VERSION)?
				.map(|guard| guard.value());
			match stored {
				Some(stored) if stored > version => {
					return Err(StoreError::Version {
						requested: version,
						stored,
					});
				}
				Some(stored) if stored < version => {
					info!(
						filesystem = %self.name,
						from = stored,
						to = version,
						"upgrading filesystem schema"
					);
					meta.insert(tables::META_SCHEMA_VERSION, version)?;
				}
				Some(_) => {}
				None => {
					meta.insert(tables::META_SCHEMA_VERSION, version)?;
				}
			}
		}
		txn.commit()?;
		Ok(())
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn handle(&self) -> &Database {
		&self.db
	}

	/// Release this handle. The database file closes once every actor
	/// sharing it has done the same.
	pub fn close(self) {
		let Self { file_path, db, .. } = self;
		drop(db);

		let mut registry = OPEN_DATABASES.lock().expect("registry mutex poisoned");
		if let Some(weak) = registry.get(&file_path) {
			if weak.upgrade().is_none() {
				registry.remove(&file_path);
			}
		}
	}

	/// Names of the filesystems present in the data directory.
	///
	/// A missing or unreadable data directory yields an empty list rather
	/// than an error, so hosts can probe unconditionally.
	pub fn list_filesystems(config: &VzfsConfig) -> Vec<String> {
		let entries = match std::fs::read_dir(&config.data_dir) {
			Ok(entries) => entries,
			Err(e) => {
				warn!(data_dir = %config.data_dir.display(), "cannot list filesystems: {e}");
				return Vec::new();
			}
		};

		let mut names: Vec<String> = entries
			.filter_map(|entry| entry.ok())
			.map(|entry| entry.path())
			.filter(|path| path.extension().is_some_and(|ext| ext == "redb"))
			.filter_map(|path| {
				path.file_stem()
					.and_then(|stem| stem.to_str())
					.map(str::to_string)
			})
			.collect();
		names.sort();
		names
	}

	/// Delete the filesystem `name`. Refused while any actor in this
	/// process still holds it open; deleting a filesystem that does not
	/// exist is a no-op.
	pub fn drop_filesystem(config: &VzfsConfig, name: &str) -> Result<(), StoreError> {
		let file_path = Self::file_path(config, name);

		{
			let mut registry = OPEN_DATABASES.lock().expect("registry mutex poisoned");
			match registry.get(&file_path).and_then(Weak::upgrade) {
				Some(_) => return Err(StoreError::Busy(name.to_string())),
				None => {
					registry.remove(&file_path);
				}
			}
		}

		match std::fs::remove_file(&file_path) {
			Ok(()) => {
				info!(filesystem = name, "dropped filesystem");
				Ok(())
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	/// Whether a database file for `name` exists on disk.
	pub fn exists(config: &VzfsConfig, name: &str) -> bool {
		Self::file_path(config, name).exists()
	}

	fn file_path(config: &VzfsConfig, name: &str) -> PathBuf {
		Path::new(&config.data_dir).join(format!("{name}.redb"))
	}
}
