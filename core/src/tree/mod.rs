//! Tree operations
//!
//! Multi-step domain operations over the entity tree. Each one composes
//! store primitives outside any single transaction; callers are expected to
//! hold a path lock covering the touched subtree for the duration of the
//! call, which is what the operator's command sequence guarantees.

mod mutate;

pub use mutate::*;

use crate::db::FsDatabase;
use crate::domain::{Entity, FileRecord};
use crate::error::{Result, VzfsError};
use crate::path::{self, RANGE_SENTINEL};
use std::ops::Bound;

/// Upper bound of the primary-key range spanning the subtree below `prefix`.
pub(crate) fn subtree_upper_bound(prefix: &str) -> String {
	format!("{prefix}{RANGE_SENTINEL}")
}

/// Resolve `target` against the working directory and fetch its entity.
pub async fn get_entity(db: &FsDatabase, cwd: &[String], target: &str) -> Result<Entity> {
	let resolved = path::normalize(target, cwd)?;
	db.get_entity_record(&resolved)
		.await?
		.ok_or(VzfsError::NotFound(resolved))
}

/// Every entity whose path starts with the normalized target, including the
/// target itself, in ascending path order.
pub async fn get_entities_by_prefix(
	db: &FsDatabase,
	cwd: &[String],
	target: &str,
) -> Result<Vec<Entity>> {
	let resolved = path::normalize(target, cwd)?;
	let upper = subtree_upper_bound(&resolved);
	Ok(db
		.get_entities_in_range(
			Bound::Included(resolved.as_str()),
			Bound::Excluded(upper.as_str()),
		)
		.await?)
}

/// Primary keys of the direct children of the target directory.
pub async fn get_immediate_child_keys(
	db: &FsDatabase,
	cwd: &[String],
	target: &str,
) -> Result<Vec<String>> {
	let entity = get_entity(db, cwd, target).await?;
	if entity.is_leaf {
		return Err(VzfsError::NotADirectory(entity.path));
	}
	Ok(db.get_child_keys(&entity.path).await?)
}

/// Join a leaf with its content record.
///
/// A missing content record joins as `None` rather than failing, so reads
/// stay total even while a best-effort cleanup is still catching up.
pub async fn join_content_to_leaf(db: &FsDatabase, leaf: &Entity) -> Result<FileRecord> {
	let content = db.get_content(&leaf.path).await?;
	Ok(FileRecord {
		entity: leaf.clone(),
		content: content.map(|record| record.content),
	})
}
