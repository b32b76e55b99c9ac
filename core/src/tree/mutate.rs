//! Mutating tree operations
//!
//! The rename/move family deletes and re-inserts rows because the canonical
//! path is the primary key. None of that spans a transaction, so each
//! operation validates its destination before the first destructive step
//! and, if the final insert still collides, puts the captured original rows
//! back before surfacing the failure.

use super::{get_entity, subtree_upper_bound};
use crate::db::{FsDatabase, StoreError};
use crate::domain::{now_millis, ContentRecord, Entity};
use crate::error::{Result, VzfsError};
use crate::path;
use std::ops::Bound;
use tracing::{error, info, warn};

/// Create a leaf named `name` under `parent_path` with the given body.
pub async fn add_file_entity(
	db: &FsDatabase,
	cwd: &[String],
	name: &str,
	parent_path: &str,
	body: &str,
) -> Result<Entity> {
	let parent = get_entity(db, cwd, parent_path).await?;
	if parent.is_leaf {
		return Err(VzfsError::NotADirectory(parent.path));
	}
	if !path::is_valid_name(name) {
		return Err(VzfsError::InvalidPath(name.to_string()));
	}

	let new_path = path::normalize(&format!("{}{name}", parent.path), cwd)?;
	let entity = Entity::new_leaf(name, &new_path, &parent.path);
	match db.insert_entity(&entity).await {
		Ok(()) => {}
		Err(StoreError::Constraint { .. }) => return Err(VzfsError::Exists(new_path)),
		Err(e) => return Err(e.into()),
	}

	db.put_content(&ContentRecord {
		leaf_path: new_path,
		content: body.to_string(),
	})
	.await?;

	info!(path = %entity.path, "created file");
	Ok(entity)
}

/// Create a directory named `name` under `parent_path`.
pub async fn add_directory_entity(
	db: &FsDatabase,
	cwd: &[String],
	name: &str,
	parent_path: &str,
) -> Result<Entity> {
	let parent = get_entity(db, cwd, parent_path).await?;
	if parent.is_leaf {
		return Err(VzfsError::NotADirectory(parent.path));
	}
	if !path::is_valid_name(name) {
		return Err(VzfsError::InvalidPath(name.to_string()));
	}

	let new_path = path::normalize(&format!("{}{name}/", parent.path), cwd)?;
	let entity = Entity::new_directory(name, &new_path, &parent.path);
	match db.insert_entity(&entity).await {
		Ok(()) => {}
		Err(StoreError::Constraint { .. }) => return Err(VzfsError::Exists(new_path)),
		Err(e) => return Err(e.into()),
	}

	info!(path = %entity.path, "created directory");
	Ok(entity)
}

/// Delete one leaf and its content record.
pub async fn delete_leaf_entity(db: &FsDatabase, cwd: &[String], target: &str) -> Result<Entity> {
	let entity = get_entity(db, cwd, target).await?;
	if !entity.is_leaf {
		return Err(VzfsError::NotALeaf(entity.path));
	}

	db.delete_entity(&entity.path).await?;
	db.delete_content(&entity.path).await?;

	info!(path = %entity.path, "deleted file");
	Ok(entity)
}

/// Delete a directory that has no children.
///
/// The root and any directory the working directory sits under are refused
/// outright; a populated directory fails as not empty.
pub async fn delete_directory_if_empty(
	db: &FsDatabase,
	cwd: &[String],
	target: &str,
) -> Result<Entity> {
	let entity = get_entity(db, cwd, target).await?;
	if entity.is_leaf {
		return Err(VzfsError::NotADirectory(entity.path));
	}
	if entity.is_root() {
		return Err(VzfsError::InvalidPath(
			"the root directory cannot be deleted".to_string(),
		));
	}
	let cwd_path = path::pieces_to_path(cwd);
	if cwd_path.starts_with(&entity.path) {
		return Err(VzfsError::InvalidPath(format!(
			"cannot delete {} while the working directory is {cwd_path}",
			entity.path
		)));
	}

	if db.count_children(&entity.path).await? > 0 {
		return Err(VzfsError::NotEmpty(entity.path));
	}

	db.delete_entity(&entity.path).await?;
	info!(path = %entity.path, "deleted directory");
	Ok(entity)
}

/// Delete everything below a directory, keeping the directory itself.
///
/// The subtree rows go in one transaction; the companion content records go
/// afterwards best-effort, so a failed content deletion leaves an orphan to
/// be swept later rather than failing the command.
pub async fn empty_directory(db: &FsDatabase, cwd: &[String], target: &str) -> Result<u64> {
	let entity = get_entity(db, cwd, target).await?;
	if entity.is_leaf {
		return Err(VzfsError::NotADirectory(entity.path));
	}
	if db.count_children(&entity.path).await? == 0 {
		return Err(VzfsError::AlreadyEmpty(entity.path));
	}

	// Exclusive lower bound: the directory row itself survives.
	let upper = subtree_upper_bound(&entity.path);
	let removed = db
		.delete_entities_in_range(
			Bound::Excluded(entity.path.as_str()),
			Bound::Excluded(upper.as_str()),
		)
		.await?;

	for leaf in removed.iter().filter(|entity| entity.is_leaf) {
		if let Err(e) = db.delete_content(&leaf.path).await {
			warn!(path = %leaf.path, "orphaned content record: {e}");
		}
	}

	info!(path = %entity.path, removed = removed.len(), "emptied directory");
	Ok(removed.len() as u64)
}

/// Replace a leaf's body and bump its modification time.
pub async fn update_file(db: &FsDatabase, cwd: &[String], target: &str, body: &str) -> Result<Entity> {
	let entity = touch_leaf(db, cwd, target).await?;
	db.put_content(&ContentRecord {
		leaf_path: entity.path.clone(),
		content: body.to_string(),
	})
	.await?;
	Ok(entity)
}

/// Bump a leaf's modification time without touching its body.
pub async fn update_file_timestamp(
	db: &FsDatabase,
	cwd: &[String],
	target: &str,
) -> Result<Entity> {
	touch_leaf(db, cwd, target).await
}

async fn touch_leaf(db: &FsDatabase, cwd: &[String], target: &str) -> Result<Entity> {
	let mut entity = get_entity(db, cwd, target).await?;
	if !entity.is_leaf {
		return Err(VzfsError::NotALeaf(entity.path));
	}
	entity.updated_at = now_millis();
	db.replace_entity(&entity).await?;
	Ok(entity)
}

/// The leaf's parent and the canonical path the leaf would occupy after
/// renaming to `new_name`.
pub async fn rename_destination(
	db: &FsDatabase,
	cwd: &[String],
	leaf: &Entity,
	new_name: &str,
) -> Result<(Entity, String)> {
	let parent_path = leaf
		.parent_path
		.as_deref()
		.ok_or_else(|| VzfsError::NotALeaf(leaf.path.clone()))?;
	let parent = get_entity(db, cwd, parent_path).await?;
	if !path::is_valid_name(new_name) {
		return Err(VzfsError::InvalidPath(new_name.to_string()));
	}
	let new_path = path::normalize(&format!("{}{new_name}", parent.path), cwd)?;
	Ok((parent, new_path))
}

/// Canonical path a leaf would occupy after moving under `new_parent`.
pub async fn reparent_destination(
	db: &FsDatabase,
	cwd: &[String],
	leaf: &Entity,
	new_parent_path: &str,
) -> Result<(Entity, String)> {
	let new_parent = get_entity(db, cwd, new_parent_path).await?;
	if new_parent.is_leaf {
		return Err(VzfsError::NotADirectory(new_parent.path));
	}
	let new_path = path::normalize(&format!("{}{}", new_parent.path, leaf.name), cwd)?;
	Ok((new_parent, new_path))
}

/// Rename a leaf in place.
pub async fn rename_file(
	db: &FsDatabase,
	cwd: &[String],
	target: &str,
	new_name: &str,
) -> Result<Entity> {
	let entity = get_entity(db, cwd, target).await?;
	if !entity.is_leaf {
		return Err(VzfsError::NotALeaf(entity.path));
	}
	let (parent, new_path) = rename_destination(db, cwd, &entity, new_name).await?;

	relocate_leaf(db, entity, new_name, parent.path, new_path).await
}

/// Move a leaf under another directory, keeping its name.
pub async fn reparent_leaf(
	db: &FsDatabase,
	cwd: &[String],
	target: &str,
	new_parent_path: &str,
) -> Result<Entity> {
	let entity = get_entity(db, cwd, target).await?;
	if !entity.is_leaf {
		return Err(VzfsError::NotALeaf(entity.path));
	}
	let (new_parent, new_path) = reparent_destination(db, cwd, &entity, new_parent_path).await?;

	let name = entity.name.clone();
	relocate_leaf(db, entity, &name, new_parent.path, new_path).await
}

/// Delete-and-reinsert a leaf under a new primary key.
///
/// The destination is probed before anything is deleted; if the final
/// insert still collides the captured original rows are re-inserted so the
/// tree ends wholly-old rather than half-moved.
async fn relocate_leaf(
	db: &FsDatabase,
	old: Entity,
	new_name: &str,
	new_parent_path: String,
	new_path: String,
) -> Result<Entity> {
	if new_path != old.path && destination_taken(db, &new_path).await? {
		return Err(VzfsError::Exists(new_path));
	}

	let old_content = db.get_content(&old.path).await?;
	db.delete_entity(&old.path).await?;
	db.delete_content(&old.path).await?;

	let new_entity = Entity {
		name: new_name.to_string(),
		path: new_path.clone(),
		is_leaf: true,
		parent_path: Some(new_parent_path),
		created_at: old.created_at,
		updated_at: now_millis(),
	};

	match db.insert_entity(&new_entity).await {
		Ok(()) => {}
		Err(StoreError::Constraint { .. }) => {
			if let Err(e) = db.insert_entity(&old).await {
				error!(path = %old.path, "failed to restore entity after collision: {e}");
			}
			if let Some(content) = &old_content {
				if let Err(e) = db.put_content(content).await {
					error!(path = %old.path, "failed to restore content after collision: {e}");
				}
			}
			return Err(VzfsError::Exists(new_path));
		}
		Err(e) => return Err(e.into()),
	}

	db.put_content(&ContentRecord {
		leaf_path: new_path,
		content: old_content.map(|record| record.content).unwrap_or_default(),
	})
	.await?;

	info!(from = %old.path, to = %new_entity.path, "moved file");
	Ok(new_entity)
}

/// Whether a file or directory already occupies the sibling slot at
/// `leaf_path`.
async fn destination_taken(db: &FsDatabase, leaf_path: &str) -> Result<bool> {
	if db.get_entity_record(leaf_path).await?.is_some() {
		return Ok(true);
	}
	// A directory holds the same sibling name under a different key.
	let dir_variant = format!("{leaf_path}/");
	Ok(db.get_entity_record(&dir_variant).await?.is_some())
}

/// Move every child of `old_parent` under `new_parent`.
///
/// The subtree walk is in ascending path order inside one transaction, so
/// an ancestor's row is always rewritten before its descendants'. Content
/// records are re-keyed afterwards, one transaction per moved leaf.
pub async fn transplant_ancestors(
	db: &FsDatabase,
	cwd: &[String],
	old_parent_path: &str,
	new_parent_path: &str,
) -> Result<u64> {
	let old_parent = get_entity(db, cwd, old_parent_path).await?;
	if old_parent.is_leaf {
		return Err(VzfsError::NotADirectory(old_parent.path));
	}
	let new_parent = get_entity(db, cwd, new_parent_path).await?;
	if new_parent.is_leaf {
		return Err(VzfsError::NotADirectory(new_parent.path));
	}
	if new_parent.path.starts_with(&old_parent.path) {
		return Err(VzfsError::InvalidPath(format!(
			"cannot move the contents of {} beneath itself",
			old_parent.path
		)));
	}

	// Validate every landing slot before the first destructive step.
	for key in db.get_child_keys(&old_parent.path).await? {
		let suffix = &key[old_parent.path.len()..];
		let target = format!("{}{suffix}", new_parent.path);
		let sibling_slot = target.trim_end_matches('/');
		if destination_taken(db, sibling_slot).await? {
			return Err(VzfsError::Exists(target));
		}
	}

	let now = now_millis();
	let old_prefix = old_parent.path.clone();
	let new_prefix = new_parent.path.clone();
	let upper = subtree_upper_bound(&old_prefix);

	let moved = db
		.rewrite_entities_in_range(
			Bound::Excluded(old_prefix.as_str()),
			Bound::Excluded(upper.as_str()),
			|mut entity| {
				let suffix = entity.path[old_prefix.len()..].to_string();
				entity.path = format!("{new_prefix}{suffix}");
				if let Some(parent) = &entity.parent_path {
					if let Some(parent_suffix) = parent.strip_prefix(old_prefix.as_str()) {
						entity.parent_path = Some(format!("{new_prefix}{parent_suffix}"));
					}
				}
				entity.updated_at = now;
				entity
			},
		)
		.await
		.map_err(|e| match e {
			StoreError::Constraint { key, .. } => VzfsError::Exists(key),
			other => VzfsError::Store(other),
		})?;

	for (old, new) in moved.iter().filter(|(old, _)| old.is_leaf) {
		db.move_content(&old.path, &new.path).await?;
	}

	info!(
		from = %old_parent.path,
		to = %new_parent.path,
		moved = moved.len(),
		"transplanted directory contents"
	);
	Ok(moved.len() as u64)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::VzfsConfig;
	use crate::tree::{get_entities_by_prefix, get_immediate_child_keys, join_content_to_leaf};
	use tempfile::tempdir;

	async fn open_fs(dir: &std::path::Path) -> FsDatabase {
		let config = VzfsConfig::new(dir);
		FsDatabase::init(&config, "mutate_test", 1).await.unwrap()
	}

	#[tokio::test]
	async fn add_file_rejects_bad_names_and_leaf_parents() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		assert!(matches!(
			add_file_entity(&fs, &[], "a b", "/", "x").await,
			Err(VzfsError::InvalidPath(_))
		));

		add_file_entity(&fs, &[], "leaf.txt", "/", "x").await.unwrap();
		assert!(matches!(
			add_file_entity(&fs, &[], "child", "/leaf.txt", "x").await,
			Err(VzfsError::NotADirectory(_))
		));
	}

	#[tokio::test]
	async fn add_file_twice_is_exists() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		add_file_entity(&fs, &[], "a.txt", "/", "one").await.unwrap();
		assert!(matches!(
			add_file_entity(&fs, &[], "a.txt", "/", "two").await,
			Err(VzfsError::Exists(_))
		));

		// The original body is untouched by the failed second create.
		let entity = get_entity(&fs, &[], "/a.txt").await.unwrap();
		let file = join_content_to_leaf(&fs, &entity).await.unwrap();
		assert_eq!(file.content.as_deref(), Some("one"));
	}

	#[tokio::test]
	async fn delete_directory_guards() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		assert!(matches!(
			delete_directory_if_empty(&fs, &[], "/").await,
			Err(VzfsError::InvalidPath(_))
		));

		add_directory_entity(&fs, &[], "d", "/").await.unwrap();
		let cwd = crate::path::abs_path_to_pieces("/d/");
		assert!(matches!(
			delete_directory_if_empty(&fs, &cwd, "/d/").await,
			Err(VzfsError::InvalidPath(_))
		));

		add_file_entity(&fs, &[], "x", "/d/", "1").await.unwrap();
		assert!(matches!(
			delete_directory_if_empty(&fs, &[], "/d/").await,
			Err(VzfsError::NotEmpty(_))
		));

		delete_leaf_entity(&fs, &[], "/d/x").await.unwrap();
		delete_directory_if_empty(&fs, &[], "/d/").await.unwrap();
		assert!(matches!(
			get_entity(&fs, &[], "/d/").await,
			Err(VzfsError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn empty_directory_spares_the_root_of_the_subtree() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		add_directory_entity(&fs, &[], "d", "/").await.unwrap();
		add_file_entity(&fs, &[], "a", "/d/", "1").await.unwrap();
		add_directory_entity(&fs, &[], "sub", "/d/").await.unwrap();
		add_file_entity(&fs, &[], "b", "/d/sub/", "2").await.unwrap();

		let removed = empty_directory(&fs, &[], "/d/").await.unwrap();
		assert_eq!(removed, 3);

		get_entity(&fs, &[], "/d/").await.unwrap();
		assert!(get_immediate_child_keys(&fs, &[], "/d/").await.unwrap().is_empty());
		assert!(fs.get_content("/d/a").await.unwrap().is_none());

		assert!(matches!(
			empty_directory(&fs, &[], "/d/").await,
			Err(VzfsError::AlreadyEmpty(_))
		));
	}

	#[tokio::test]
	async fn rename_collision_leaves_the_tree_wholly_old() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		add_file_entity(&fs, &[], "a.txt", "/", "body a").await.unwrap();
		add_file_entity(&fs, &[], "b.txt", "/", "body b").await.unwrap();

		assert!(matches!(
			rename_file(&fs, &[], "/a.txt", "b.txt").await,
			Err(VzfsError::Exists(_))
		));

		// Both files still exist with their original bodies.
		for (path, body) in [("/a.txt", "body a"), ("/b.txt", "body b")] {
			let entity = get_entity(&fs, &[], path).await.unwrap();
			let file = join_content_to_leaf(&fs, &entity).await.unwrap();
			assert_eq!(file.content.as_deref(), Some(body));
		}
	}

	#[tokio::test]
	async fn rename_moves_entity_and_content() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		let created = add_file_entity(&fs, &[], "old.txt", "/", "body").await.unwrap();
		let renamed = rename_file(&fs, &[], "/old.txt", "new.txt").await.unwrap();

		assert_eq!(renamed.path, "/new.txt");
		assert_eq!(renamed.name, "new.txt");
		assert_eq!(renamed.created_at, created.created_at);
		assert!(renamed.updated_at >= created.updated_at);

		assert!(matches!(
			get_entity(&fs, &[], "/old.txt").await,
			Err(VzfsError::NotFound(_))
		));
		let file = join_content_to_leaf(&fs, &renamed).await.unwrap();
		assert_eq!(file.content.as_deref(), Some("body"));
	}

	#[tokio::test]
	async fn rename_collides_with_a_directory_of_the_same_name() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		add_file_entity(&fs, &[], "a.txt", "/", "x").await.unwrap();
		add_directory_entity(&fs, &[], "taken", "/").await.unwrap();

		assert!(matches!(
			rename_file(&fs, &[], "/a.txt", "taken").await,
			Err(VzfsError::Exists(_))
		));
	}

	#[tokio::test]
	async fn reparent_moves_a_leaf_between_directories() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		add_directory_entity(&fs, &[], "src", "/").await.unwrap();
		add_directory_entity(&fs, &[], "dst", "/").await.unwrap();
		add_file_entity(&fs, &[], "a.txt", "/src/", "body").await.unwrap();

		let moved = reparent_leaf(&fs, &[], "/src/a.txt", "/dst/").await.unwrap();
		assert_eq!(moved.path, "/dst/a.txt");
		assert_eq!(moved.parent_path.as_deref(), Some("/dst/"));

		assert_eq!(
			get_immediate_child_keys(&fs, &[], "/dst/").await.unwrap(),
			vec!["/dst/a.txt"]
		);
		assert!(get_immediate_child_keys(&fs, &[], "/src/").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn transplant_moves_a_whole_subtree() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		add_directory_entity(&fs, &[], "old", "/").await.unwrap();
		add_directory_entity(&fs, &[], "new", "/").await.unwrap();
		add_file_entity(&fs, &[], "a", "/old/", "1").await.unwrap();
		add_directory_entity(&fs, &[], "sub", "/old/").await.unwrap();
		add_file_entity(&fs, &[], "b", "/old/sub/", "2").await.unwrap();

		let moved = transplant_ancestors(&fs, &[], "/old/", "/new/").await.unwrap();
		assert_eq!(moved, 3);

		let subtree = get_entities_by_prefix(&fs, &[], "/new/").await.unwrap();
		let paths: Vec<&str> = subtree.iter().map(|e| e.path.as_str()).collect();
		assert_eq!(paths, vec!["/new/", "/new/a", "/new/sub/", "/new/sub/b"]);

		// Parent pointers were rewritten all the way down.
		let deep = get_entity(&fs, &[], "/new/sub/b").await.unwrap();
		assert_eq!(deep.parent_path.as_deref(), Some("/new/sub/"));

		let body = fs.get_content("/new/sub/b").await.unwrap().unwrap();
		assert_eq!(body.content, "2");
		assert!(fs.get_content("/old/sub/b").await.unwrap().is_none());

		// The old directory remains, now empty.
		assert!(get_immediate_child_keys(&fs, &[], "/old/").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn transplant_into_own_subtree_is_rejected() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		add_directory_entity(&fs, &[], "old", "/").await.unwrap();
		add_directory_entity(&fs, &[], "inner", "/old/").await.unwrap();

		assert!(matches!(
			transplant_ancestors(&fs, &[], "/old/", "/old/inner/").await,
			Err(VzfsError::InvalidPath(_))
		));
	}

	#[tokio::test]
	async fn transplant_with_occupied_destination_is_exists() {
		let dir = tempdir().unwrap();
		let fs = open_fs(dir.path()).await;

		add_directory_entity(&fs, &[], "old", "/").await.unwrap();
		add_directory_entity(&fs, &[], "new", "/").await.unwrap();
		add_file_entity(&fs, &[], "a", "/old/", "1").await.unwrap();
		add_file_entity(&fs, &[], "a", "/new/", "other").await.unwrap();

		assert!(matches!(
			transplant_ancestors(&fs, &[], "/old/", "/new/").await,
			Err(VzfsError::Exists(_))
		));

		// Nothing moved.
		get_entity(&fs, &[], "/old/a").await.unwrap();
		let untouched = fs.get_content("/new/a").await.unwrap().unwrap();
		assert_eq!(untouched.content, "other");
	}
}
