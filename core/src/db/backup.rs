//! Whole-filesystem export and import
//!
//! A backup is a single JSON document holding the raw records of the three
//! object stores. Index tables are not exported; they are rebuilt record by
//! record at import time.

use super::{FsDatabase, StoreError};
use crate::config::VzfsConfig;
use crate::domain::{now_millis, ContentRecord, Entity, LockRecord};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Raw dump of one filesystem database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
	pub entity: Vec<Entity>,
	pub content: Vec<ContentRecord>,
	pub lock: Vec<LockRecord>,
}

impl FsDatabase {
	/// Dump the raw records of all three stores inside a single readonly
	/// transaction.
	pub async fn dump(&self) -> Result<Backup, StoreError> {
		let txn = self.handle().begin_read()?;

		let mut entity = Vec::new();
		let entities = txn.open_table(super::tables::ENTITY)?;
		for row in entities.iter()? {
			let (_, value) = row?;
			entity.push(rmp_serde::from_slice(value.value())?);
		}

		let mut content = Vec::new();
		let contents = txn.open_table(super::tables::CONTENT)?;
		for row in contents.iter()? {
			let (_, value) = row?;
			content.push(rmp_serde::from_slice(value.value())?);
		}

		let mut lock = Vec::new();
		let locks = txn.open_table(super::tables::LOCK)?;
		for row in locks.iter()? {
			let (_, value) = row?;
			lock.push(rmp_serde::from_slice(value.value())?);
		}

		Ok(Backup {
			entity,
			content,
			lock,
		})
	}

	/// Serialize the whole filesystem into one JSON document.
	pub async fn rip_to_json(&self) -> Result<String, StoreError> {
		let backup = self.dump().await?;
		debug!(
			entities = backup.entity.len(),
			contents = backup.content.len(),
			locks = backup.lock.len(),
			"ripped filesystem to backup"
		);
		Ok(serde_json::to_string(&backup)?)
	}

	/// Create the filesystem `name` from a backup document.
	///
	/// Refuses to touch an existing database; restoring never merges. Locks
	/// whose lease already lapsed are dropped at import instead of being
	/// carried into the new database.
	pub async fn restore_from_json(
		config: &VzfsConfig,
		name: &str,
		version: u32,
		backup: &str,
	) -> Result<Self, StoreError> {
		if Self::exists(config, name) {
			return Err(StoreError::DatabaseExists(name.to_string()));
		}

		let backup: Backup = serde_json::from_str(backup)?;

		let fs = Self::open_raw(config, name)?;
		fs.ensure_schema(version)?;

		for entity in &backup.entity {
			fs.insert_entity(entity).await?;
		}
		for content in &backup.content {
			fs.put_content(content).await?;
		}

		let now = now_millis();
		let mut dropped = 0;
		for lock in &backup.lock {
			if lock.is_expired(now) {
				dropped += 1;
				continue;
			}
			fs.insert_lock(lock).await?;
		}

		info!(
			filesystem = name,
			entities = backup.entity.len(),
			dropped_locks = dropped,
			"restored filesystem from backup"
		);
		Ok(fs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[tokio::test]
	async fn restore_refuses_an_existing_database() {
		let dir = tempdir().unwrap();
		let config = VzfsConfig::new(dir.path());

		let fs = FsDatabase::init(&config, "taken", 1).await.unwrap();
		let backup = fs.rip_to_json().await.unwrap();
		fs.close();

		assert!(matches!(
			FsDatabase::restore_from_json(&config, "taken", 1, &backup).await,
			Err(StoreError::DatabaseExists(_))
		));
	}

	#[tokio::test]
	async fn expired_locks_are_dropped_at_import() {
		let dir = tempdir().unwrap();
		let config = VzfsConfig::new(dir.path());

		let fs = FsDatabase::init(&config, "source", 1).await.unwrap();
		let now = now_millis();
		fs.insert_lock(&LockRecord::new("/stale/".to_string(), now - 60_000, 1000))
			.await
			.unwrap();
		fs.insert_lock(&LockRecord::new("/live/".to_string(), now, 600_000))
			.await
			.unwrap();
		let backup = fs.rip_to_json().await.unwrap();
		fs.close();

		let restored = FsDatabase::restore_from_json(&config, "copy", 1, &backup)
			.await
			.unwrap();
		let locks = restored.get_all_locks().await.unwrap();
		assert_eq!(locks.len(), 1);
		assert_eq!(locks[0].path_prefix, "/live/");
	}
}
