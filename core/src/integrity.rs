//! Filesystem invariant checks
//!
//! The tree, content, and lock stores obey a handful of structural rules
//! whenever no operation is in flight: one root, parents that exist and are
//! directories, materialized paths that agree with the parent chain, unique
//! sibling names, and a one-to-one pairing between leaves and content
//! records. [`check_filesystem`] sweeps a database and reports every rule
//! that does not hold, which is how the test suite pins down that failed
//! and interrupted operations never leave the tree half-moved.

use crate::db::backup::Backup;
use crate::db::{FsDatabase, StoreError};
use crate::domain::now_millis;
use crate::path;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One structural rule that does not currently hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
	/// No entity with a null parent exists.
	MissingRoot,

	/// More than one entity claims to be the root.
	ExtraRoot { path: String },

	/// The root record itself is malformed.
	MalformedRoot { path: String },

	/// A non-root entity whose parent record does not exist.
	OrphanEntity { path: String },

	/// An entity whose parent record is a leaf.
	ParentIsALeaf { path: String },

	/// A materialized path that disagrees with `parentPath` + `name`.
	PathMismatch { path: String, expected: String },

	/// An entity name outside the accepted character class.
	BadName { path: String },

	/// Two siblings sharing a name.
	DuplicateSibling { parent_path: String, name: String },

	/// A leaf without a content record.
	MissingContent { leaf_path: String },

	/// A content record without a matching leaf.
	OrphanContent { leaf_path: String },
}

impl fmt::Display for Violation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Violation::MissingRoot => write!(f, "no root entity"),
			Violation::ExtraRoot { path } => write!(f, "extra root entity at {path}"),
			Violation::MalformedRoot { path } => write!(f, "malformed root entity at {path}"),
			Violation::OrphanEntity { path } => write!(f, "entity {path} has no parent record"),
			Violation::ParentIsALeaf { path } => write!(f, "entity {path} has a leaf parent"),
			Violation::PathMismatch { path, expected } => {
				write!(f, "entity {path} should be materialized at {expected}")
			}
			Violation::BadName { path } => write!(f, "entity {path} has an invalid name"),
			Violation::DuplicateSibling { parent_path, name } => {
				write!(f, "duplicate sibling {name} under {parent_path}")
			}
			Violation::MissingContent { leaf_path } => {
				write!(f, "leaf {leaf_path} has no content record")
			}
			Violation::OrphanContent { leaf_path } => {
				write!(f, "content record {leaf_path} has no leaf")
			}
		}
	}
}

/// Outcome of one integrity sweep.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
	pub violations: Vec<Violation>,

	/// Lock rows whose lease had lapsed at sweep time. Not a violation on
	/// its own; the pruner reaps them eventually.
	pub expired_locks: usize,
}

impl IntegrityReport {
	pub fn is_clean(&self) -> bool {
		self.violations.is_empty()
	}
}

/// Check every structural rule against a raw dump.
pub fn check_backup(backup: &Backup, now: i64) -> IntegrityReport {
	let mut violations = Vec::new();

	let by_path: HashMap<&str, &crate::domain::Entity> = backup
		.entity
		.iter()
		.map(|entity| (entity.path.as_str(), entity))
		.collect();

	// Exactly one well-formed root.
	let roots: Vec<_> = backup
		.entity
		.iter()
		.filter(|entity| entity.parent_path.is_none())
		.collect();
	match roots.as_slice() {
		[] => violations.push(Violation::MissingRoot),
		[root] => {
			if root.path != "/" || root.is_leaf || !root.name.is_empty() {
				violations.push(Violation::MalformedRoot {
					path: root.path.clone(),
				});
			}
		}
		many => {
			for root in &many[1..] {
				violations.push(Violation::ExtraRoot {
					path: root.path.clone(),
				});
			}
		}
	}

	// Parent chain and materialized paths.
	let mut sibling_slots: HashSet<(&str, &str)> = HashSet::new();
	for entity in &backup.entity {
		let Some(parent_path) = entity.parent_path.as_deref() else {
			continue;
		};

		if !path::is_valid_name(&entity.name) {
			violations.push(Violation::BadName {
				path: entity.path.clone(),
			});
		}

		match by_path.get(parent_path) {
			None => violations.push(Violation::OrphanEntity {
				path: entity.path.clone(),
			}),
			Some(parent) if parent.is_leaf => violations.push(Violation::ParentIsALeaf {
				path: entity.path.clone(),
			}),
			Some(parent) => {
				let expected = if entity.is_leaf {
					format!("{}{}", parent.path, entity.name)
				} else {
					format!("{}{}/", parent.path, entity.name)
				};
				if entity.path != expected {
					violations.push(Violation::PathMismatch {
						path: entity.path.clone(),
						expected,
					});
				}
			}
		}

		if !sibling_slots.insert((parent_path, entity.name.as_str())) {
			violations.push(Violation::DuplicateSibling {
				parent_path: parent_path.to_string(),
				name: entity.name.clone(),
			});
		}
	}

	// Leaves and content records pair one-to-one.
	let content_keys: HashSet<&str> = backup
		.content
		.iter()
		.map(|record| record.leaf_path.as_str())
		.collect();
	for entity in backup.entity.iter().filter(|entity| entity.is_leaf) {
		if !content_keys.contains(entity.path.as_str()) {
			violations.push(Violation::MissingContent {
				leaf_path: entity.path.clone(),
			});
		}
	}
	for record in &backup.content {
		match by_path.get(record.leaf_path.as_str()) {
			Some(entity) if entity.is_leaf => {}
			_ => violations.push(Violation::OrphanContent {
				leaf_path: record.leaf_path.clone(),
			}),
		}
	}

	let expired_locks = backup
		.lock
		.iter()
		.filter(|lock| lock.is_expired(now))
		.count();

	IntegrityReport {
		violations,
		expired_locks,
	}
}

/// Sweep a live database.
pub async fn check_filesystem(db: &FsDatabase) -> Result<IntegrityReport, StoreError> {
	let backup = db.dump().await?;
	Ok(check_backup(&backup, now_millis()))
}
