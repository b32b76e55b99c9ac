//! Store primitives
//!
//! Thin typed wrappers over the store engine. Every method here wraps
//! exactly one transaction; multi-step domain operations compose these
//! calls and rely on the lock table for cross-transaction safety.
//!
//! The engine has no declarative secondary indexes or unique constraints,
//! so the write paths maintain the index tables of [`tables`](super::tables)
//! themselves and raise [`StoreError::Constraint`] on primary-key or
//! composite-key collisions before anything is written.

use super::tables;
use super::{FsDatabase, StoreError};
use crate::domain::{ContentRecord, Entity, LockRecord};
use redb::{MultimapTable, ReadableTable, Table, WriteTransaction};
use std::ops::Bound;

fn encode<T: serde::Serialize>(record: &T) -> Result<Vec<u8>, StoreError> {
	Ok(rmp_serde::to_vec_named(record)?)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
	Ok(rmp_serde::from_slice(bytes)?)
}

/// The entity store and its five indexes, opened together in one write
/// transaction so a row and its index entries always move in lockstep.
struct EntityTables<'txn> {
	rows: Table<'txn, &'static str, &'static [u8]>,
	by_name: MultimapTable<'txn, &'static str, &'static str>,
	by_parent: MultimapTable<'txn, &'static str, &'static str>,
	by_created: MultimapTable<'txn, i64, &'static str>,
	by_updated: MultimapTable<'txn, i64, &'static str>,
	by_parent_name: Table<'txn, (&'static str, &'static str), &'static str>,
}

impl<'txn> EntityTables<'txn> {
	fn open(txn: &'txn WriteTransaction) -> Result<Self, StoreError> {
		Ok(Self {
			rows: txn.open_table(tables::ENTITY)?,
			by_name: txn.open_multimap_table(tables::ENTITY_BY_NAME)?,
			by_parent: txn.open_multimap_table(tables::ENTITY_BY_PARENT)?,
			by_created: txn.open_multimap_table(tables::ENTITY_BY_CREATED)?,
			by_updated: txn.open_multimap_table(tables::ENTITY_BY_UPDATED)?,
			by_parent_name: txn.open_table(tables::ENTITY_BY_PARENT_NAME)?,
		})
	}

	/// Insert a new entity, failing with a constraint collision if the path
	/// or the `(parentPath, name)` pair is already taken.
	fn insert(&mut self, entity: &Entity) -> Result<(), StoreError> {
		if self.rows.get(entity.path.as_str())?.is_some() {
			return Err(StoreError::Constraint {
				index: "entity",
				key: entity.path.clone(),
			});
		}
		if let Some(parent) = entity.parent_path.as_deref() {
			if self
				.by_parent_name
				.get((parent, entity.name.as_str()))?
				.is_some()
			{
				return Err(StoreError::Constraint {
					index: "entity.parentPath+name",
					key: format!("{parent}{}", entity.name),
				});
			}
		}

		self.rows
			.insert(entity.path.as_str(), encode(entity)?.as_slice())?;
		self.index(entity)?;
		Ok(())
	}

	/// Remove an entity row and every index entry pointing at it.
	fn remove(&mut self, path: &str) -> Result<Option<Entity>, StoreError> {
		let entity = match self.rows.remove(path)? {
			Some(guard) => decode::<Entity>(guard.value())?,
			None => return Ok(None),
		};
		self.unindex(&entity)?;
		Ok(Some(entity))
	}

	fn index(&mut self, entity: &Entity) -> Result<(), StoreError> {
		let path = entity.path.as_str();
		self.by_name.insert(entity.name.as_str(), path)?;
		self.by_created.insert(entity.created_at, path)?;
		self.by_updated.insert(entity.updated_at, path)?;
		if let Some(parent) = entity.parent_path.as_deref() {
			self.by_parent.insert(parent, path)?;
			self.by_parent_name
				.insert((parent, entity.name.as_str()), path)?;
		}
		Ok(())
	}

	fn unindex(&mut self, entity: &Entity) -> Result<(), StoreError> {
		let path = entity.path.as_str();
		self.by_name.remove(entity.name.as_str(), path)?;
		self.by_created.remove(entity.created_at, path)?;
		self.by_updated.remove(entity.updated_at, path)?;
		if let Some(parent) = entity.parent_path.as_deref() {
			self.by_parent.remove(parent, path)?;
			self.by_parent_name
				.remove((parent, entity.name.as_str()))?;
		}
		Ok(())
	}
}

/// The lock store and its two indexes.
struct LockTables<'txn> {
	rows: Table<'txn, &'static str, &'static [u8]>,
	by_expiry: MultimapTable<'txn, i64, &'static str>,
	by_created: MultimapTable<'txn, i64, &'static str>,
}

impl<'txn> LockTables<'txn> {
	fn open(txn: &'txn WriteTransaction) -> Result<Self, StoreError> {
		Ok(Self {
			rows: txn.open_table(tables::LOCK)?,
			by_expiry: txn.open_multimap_table(tables::LOCK_BY_EXPIRY)?,
			by_created: txn.open_multimap_table(tables::LOCK_BY_CREATED)?,
		})
	}

	fn insert(&mut self, lock: &LockRecord) -> Result<(), StoreError> {
		if self.rows.get(lock.path_prefix.as_str())?.is_some() {
			return Err(StoreError::Constraint {
				index: "lock",
				key: lock.path_prefix.clone(),
			});
		}
		self.rows
			.insert(lock.path_prefix.as_str(), encode(lock)?.as_slice())?;
		self.by_expiry.insert(lock.expiry, lock.path_prefix.as_str())?;
		self.by_created
			.insert(lock.created_at, lock.path_prefix.as_str())?;
		Ok(())
	}

	fn remove(&mut self, path_prefix: &str) -> Result<bool, StoreError> {
		let lock = match self.rows.remove(path_prefix)? {
			Some(guard) => decode::<LockRecord>(guard.value())?,
			None => return Ok(false),
		};
		self.by_expiry.remove(lock.expiry, path_prefix)?;
		self.by_created.remove(lock.created_at, path_prefix)?;
		Ok(true)
	}
}

impl FsDatabase {
	// --- entity primitives ---

	/// Fetch one entity by primary key.
	pub async fn get_entity_record(&self, path: &str) -> Result<Option<Entity>, StoreError> {
		let txn = self.handle().begin_read()?;
		let table = txn.open_table(tables::ENTITY)?;
		match table.get(path)? {
			Some(guard) => Ok(Some(decode(guard.value())?)),
			None => Ok(None),
		}
	}

	/// Insert a new entity, maintaining every index.
	pub async fn insert_entity(&self, entity: &Entity) -> Result<(), StoreError> {
		let txn = self.handle().begin_write()?;
		{
			let mut entities = EntityTables::open(&txn)?;
			entities.insert(entity)?;
		}
		txn.commit()?;
		Ok(())
	}

	/// Overwrite the entity at `entity.path` in place, refreshing its index
	/// entries. The row must already exist.
	pub async fn replace_entity(&self, entity: &Entity) -> Result<(), StoreError> {
		let txn = self.handle().begin_write()?;
		{
			let mut entities = EntityTables::open(&txn)?;
			if entities.remove(entity.path.as_str())?.is_none() {
				return Err(StoreError::Constraint {
					index: "entity",
					key: entity.path.clone(),
				});
			}
			entities.insert(entity)?;
		}
		txn.commit()?;
		Ok(())
	}

	/// Delete one entity by primary key, returning the removed record.
	pub async fn delete_entity(&self, path: &str) -> Result<Option<Entity>, StoreError> {
		let txn = self.handle().begin_write()?;
		let removed = {
			let mut entities = EntityTables::open(&txn)?;
			entities.remove(path)?
		};
		txn.commit()?;
		Ok(removed)
	}

	/// All entities whose path falls inside the given primary-key range, in
	/// ascending path order.
	pub async fn get_entities_in_range(
		&self,
		lower: Bound<&str>,
		upper: Bound<&str>,
	) -> Result<Vec<Entity>, StoreError> {
		let txn = self.handle().begin_read()?;
		let table = txn.open_table(tables::ENTITY)?;
		let mut out = Vec::new();
		for row in table.range::<&str>((lower, upper))? {
			let (_, value) = row?;
			out.push(decode(value.value())?);
		}
		Ok(out)
	}

	/// Delete every entity in the range inside one transaction, returning
	/// the removed records in ascending path order.
	pub async fn delete_entities_in_range(
		&self,
		lower: Bound<&str>,
		upper: Bound<&str>,
	) -> Result<Vec<Entity>, StoreError> {
		let txn = self.handle().begin_write()?;
		let removed = {
			let mut entities = EntityTables::open(&txn)?;
			let doomed: Vec<String> = {
				let mut keys = Vec::new();
				for row in entities.rows.range::<&str>((lower, upper))? {
					let (key, _) = row?;
					keys.push(key.value().to_string());
				}
				keys
			};

			let mut removed = Vec::with_capacity(doomed.len());
			for path in &doomed {
				if let Some(entity) = entities.remove(path)? {
					removed.push(entity);
				}
			}
			removed
		};
		txn.commit()?;
		Ok(removed)
	}

	/// Rewrite every entity in the range through `map` inside one
	/// transaction, walking in ascending path order.
	///
	/// Rows are re-keyed when the mapping changes their path, so the whole
	/// batch either commits or aborts together; a collision with a row
	/// outside the range aborts with a constraint error. Returns the
	/// `(old, new)` pairs in walk order.
	pub async fn rewrite_entities_in_range(
		&self,
		lower: Bound<&str>,
		upper: Bound<&str>,
		map: impl Fn(Entity) -> Entity,
	) -> Result<Vec<(Entity, Entity)>, StoreError> {
		let txn = self.handle().begin_write()?;
		let moved = {
			let mut entities = EntityTables::open(&txn)?;
			let originals: Vec<Entity> = {
				let mut rows = Vec::new();
				for row in entities.rows.range::<&str>((lower, upper))? {
					let (_, value) = row?;
					rows.push(decode(value.value())?);
				}
				rows
			};

			let mut moved = Vec::with_capacity(originals.len());
			for old in originals {
				entities.remove(old.path.as_str())?;
				let new = map(old.clone());
				entities.insert(&new)?;
				moved.push((old, new));
			}
			moved
		};
		txn.commit()?;
		Ok(moved)
	}

	/// Number of entities whose parent is `parent_path`.
	pub async fn count_children(&self, parent_path: &str) -> Result<u64, StoreError> {
		let txn = self.handle().begin_read()?;
		let index = txn.open_multimap_table(tables::ENTITY_BY_PARENT)?;
		let mut count = 0;
		for value in index.get(parent_path)? {
			value?;
			count += 1;
		}
		Ok(count)
	}

	/// Primary keys of the entities whose parent is `parent_path`, in
	/// ascending path order.
	pub async fn get_child_keys(&self, parent_path: &str) -> Result<Vec<String>, StoreError> {
		let txn = self.handle().begin_read()?;
		let index = txn.open_multimap_table(tables::ENTITY_BY_PARENT)?;
		let mut keys = Vec::new();
		for value in index.get(parent_path)? {
			keys.push(value?.value().to_string());
		}
		Ok(keys)
	}

	// --- content primitives ---

	/// Fetch the content record of one leaf.
	pub async fn get_content(&self, leaf_path: &str) -> Result<Option<ContentRecord>, StoreError> {
		let txn = self.handle().begin_read()?;
		let table = txn.open_table(tables::CONTENT)?;
		match table.get(leaf_path)? {
			Some(guard) => Ok(Some(decode(guard.value())?)),
			None => Ok(None),
		}
	}

	/// Insert or replace the content record keyed by `record.leaf_path`.
	pub async fn put_content(&self, record: &ContentRecord) -> Result<(), StoreError> {
		let txn = self.handle().begin_write()?;
		{
			let mut table = txn.open_table(tables::CONTENT)?;
			table.insert(record.leaf_path.as_str(), encode(record)?.as_slice())?;
		}
		txn.commit()?;
		Ok(())
	}

	/// Delete one content record, reporting whether it existed.
	pub async fn delete_content(&self, leaf_path: &str) -> Result<bool, StoreError> {
		let txn = self.handle().begin_write()?;
		let existed = {
			let mut table = txn.open_table(tables::CONTENT)?;
			let removed = table.remove(leaf_path)?;
			removed.is_some()
		};
		txn.commit()?;
		Ok(existed)
	}

	/// Re-key one content record from `old_path` to `new_path` in a single
	/// transaction, so a moved leaf never observably loses its body.
	pub async fn move_content(&self, old_path: &str, new_path: &str) -> Result<bool, StoreError> {
		let txn = self.handle().begin_write()?;
		let moved = {
			let mut table = txn.open_table(tables::CONTENT)?;
			let record = match table.remove(old_path)? {
				Some(guard) => {
					let mut record: ContentRecord = decode(guard.value())?;
					record.leaf_path = new_path.to_string();
					Some(record)
				}
				None => None,
			};
			match record {
				Some(record) => {
					table.insert(new_path, encode(&record)?.as_slice())?;
					true
				}
				None => false,
			}
		};
		txn.commit()?;
		Ok(moved)
	}

	// --- lock primitives ---

	/// Fetch one lock by its path prefix.
	pub async fn get_lock(&self, path_prefix: &str) -> Result<Option<LockRecord>, StoreError> {
		let txn = self.handle().begin_read()?;
		let table = txn.open_table(tables::LOCK)?;
		match table.get(path_prefix)? {
			Some(guard) => Ok(Some(decode(guard.value())?)),
			None => Ok(None),
		}
	}

	/// Claim a lock row. A prefix that is already claimed, expired or not,
	/// collides with a constraint error.
	pub async fn insert_lock(&self, lock: &LockRecord) -> Result<(), StoreError> {
		let txn = self.handle().begin_write()?;
		{
			let mut locks = LockTables::open(&txn)?;
			locks.insert(lock)?;
		}
		txn.commit()?;
		Ok(())
	}

	/// Release a lock row, reporting whether it existed.
	pub async fn delete_lock(&self, path_prefix: &str) -> Result<bool, StoreError> {
		let txn = self.handle().begin_write()?;
		let existed = {
			let mut locks = LockTables::open(&txn)?;
			locks.remove(path_prefix)?
		};
		txn.commit()?;
		Ok(existed)
	}

	/// Locks whose expiry lies strictly after `now`, via the expiry index.
	pub async fn get_unexpired_locks(&self, now: i64) -> Result<Vec<LockRecord>, StoreError> {
		let txn = self.handle().begin_read()?;
		let index = txn.open_multimap_table(tables::LOCK_BY_EXPIRY)?;
		let rows = txn.open_table(tables::LOCK)?;

		let mut out = Vec::new();
		for entry in index.range::<i64>((Bound::Excluded(now), Bound::Unbounded))? {
			let (_, prefixes) = entry?;
			for prefix in prefixes {
				let prefix = prefix?;
				if let Some(guard) = rows.get(prefix.value())? {
					out.push(decode(guard.value())?);
				}
			}
		}
		Ok(out)
	}

	/// Every lock row, expired or not.
	pub async fn get_all_locks(&self) -> Result<Vec<LockRecord>, StoreError> {
		let txn = self.handle().begin_read()?;
		let table = txn.open_table(tables::LOCK)?;
		let mut out = Vec::new();
		for row in table.iter()? {
			let (_, value) = row?;
			out.push(decode(value.value())?);
		}
		Ok(out)
	}

	/// Path prefixes of locks whose expiry is at or before `now`, via the
	/// expiry index.
	pub async fn get_expired_lock_keys(&self, now: i64) -> Result<Vec<String>, StoreError> {
		let txn = self.handle().begin_read()?;
		let index = txn.open_multimap_table(tables::LOCK_BY_EXPIRY)?;

		let mut out = Vec::new();
		for entry in index.range::<i64>((Bound::Unbounded, Bound::Included(now)))? {
			let (_, prefixes) = entry?;
			for prefix in prefixes {
				out.push(prefix?.value().to_string());
			}
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::VzfsConfig;
	use crate::domain::now_millis;
	use tempfile::tempdir;

	async fn open_fs(dir: &std::path::Path) -> FsDatabase {
		let config = VzfsConfig::new(dir);
		FsDatabase::init(&config, "store_test", 1).await.unwrap()
	}

	#[tokio::test]
	async fn insert_collides_on_path_and_sibling_name() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		let leaf = Entity::new_leaf("a.txt", "/a.txt", "/");
		fs.insert_entity(&leaf).await.unwrap();

		let same_path = Entity::new_leaf("a.txt", "/a.txt", "/");
		assert!(matches!(
			fs.insert_entity(&same_path).await,
			Err(StoreError::Constraint { index: "entity", .. })
		));

		// A directory with the same sibling name collides on the composite
		// index even though its primary key differs.
		let same_name = Entity::new_directory("a.txt", "/a.txt/", "/");
		assert!(matches!(
			fs.insert_entity(&same_name).await,
			Err(StoreError::Constraint {
				index: "entity.parentPath+name",
				..
			})
		));
	}

	#[tokio::test]
	async fn range_scans_are_ascending_and_respect_bounds() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		fs.insert_entity(&Entity::new_directory("d", "/d/", "/"))
			.await
			.unwrap();
		fs.insert_entity(&Entity::new_leaf("b.txt", "/d/b.txt", "/d/"))
			.await
			.unwrap();
		fs.insert_entity(&Entity::new_leaf("a.txt", "/d/a.txt", "/d/"))
			.await
			.unwrap();

		let upper = format!("/d/{}", crate::path::RANGE_SENTINEL);
		let subtree = fs
			.get_entities_in_range(Bound::Excluded("/d/"), Bound::Excluded(upper.as_str()))
			.await
			.unwrap();
		let paths: Vec<&str> = subtree.iter().map(|e| e.path.as_str()).collect();
		// Exclusive lower bound skips the directory itself.
		assert_eq!(paths, vec!["/d/a.txt", "/d/b.txt"]);
	}

	#[tokio::test]
	async fn child_keys_come_from_the_parent_index() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		fs.insert_entity(&Entity::new_directory("d", "/d/", "/"))
			.await
			.unwrap();
		fs.insert_entity(&Entity::new_leaf("x", "/d/x", "/d/"))
			.await
			.unwrap();
		fs.insert_entity(&Entity::new_directory("y", "/d/y/", "/d/"))
			.await
			.unwrap();
		// A grandchild must not show up in the direct child listing.
		fs.insert_entity(&Entity::new_leaf("z", "/d/y/z", "/d/y/"))
			.await
			.unwrap();

		assert_eq!(fs.get_child_keys("/d/").await.unwrap(), vec!["/d/x", "/d/y/"]);
		assert_eq!(fs.count_children("/d/").await.unwrap(), 2);
	}

	#[tokio::test]
	async fn replace_refreshes_timestamp_indexes() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		let mut leaf = Entity::new_leaf("a", "/a", "/");
		fs.insert_entity(&leaf).await.unwrap();

		leaf.updated_at += 1000;
		fs.replace_entity(&leaf).await.unwrap();

		let read_back = fs.get_entity_record("/a").await.unwrap().unwrap();
		assert_eq!(read_back.updated_at, leaf.updated_at);
	}

	#[tokio::test]
	async fn delete_clears_the_composite_slot() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		fs.insert_entity(&Entity::new_leaf("a", "/a", "/")).await.unwrap();
		fs.delete_entity("/a").await.unwrap();

		// The sibling slot is free again.
		fs.insert_entity(&Entity::new_directory("a", "/a/", "/"))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn lock_rows_collide_and_index_by_expiry() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;
		let now = now_millis();

		fs.insert_lock(&LockRecord::new("/a/".to_string(), now, 5000))
			.await
			.unwrap();
		assert!(matches!(
			fs.insert_lock(&LockRecord::new("/a/".to_string(), now, 5000)).await,
			Err(StoreError::Constraint { index: "lock", .. })
		));

		fs.insert_lock(&LockRecord::new("/b/".to_string(), now - 10_000, 1000))
			.await
			.unwrap();

		let unexpired = fs.get_unexpired_locks(now).await.unwrap();
		assert_eq!(unexpired.len(), 1);
		assert_eq!(unexpired[0].path_prefix, "/a/");

		let expired = fs.get_expired_lock_keys(now).await.unwrap();
		assert_eq!(expired, vec!["/b/"]);
	}

	#[tokio::test]
	async fn move_content_rekeys_in_one_transaction() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		fs.put_content(&ContentRecord {
			leaf_path: "/a".to_string(),
			content: "body".to_string(),
		})
		.await
		.unwrap();

		assert!(fs.move_content("/a", "/b").await.unwrap());
		assert!(fs.get_content("/a").await.unwrap().is_none());
		let moved = fs.get_content("/b").await.unwrap().unwrap();
		assert_eq!(moved.leaf_path, "/b");
		assert_eq!(moved.content, "body");

		assert!(!fs.move_content("/missing", "/c").await.unwrap());
	}
}
