//! Entity - one node of the filesystem tree
//!
//! An entity is either a directory or a leaf (a file). The full canonical
//! path is materialized in the record, which is what makes subtree range
//! queries over the primary key possible.

use crate::domain::now_millis;
use serde::{Deserialize, Serialize};

/// One tree node, keyed by its canonical path.
///
/// Directory paths end in `/`, leaf paths never do. The root directory is
/// the single entity with `parent_path: None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
	/// Last path segment, empty only for the root
	pub name: String,

	/// Canonical absolute path, the primary key
	pub path: String,

	/// Leaves are files and carry a companion content record
	pub is_leaf: bool,

	/// Path of the parent directory, `None` only for the root
	pub parent_path: Option<String>,

	/// Millisecond epoch timestamps
	pub created_at: i64,
	pub updated_at: i64,
}

impl Entity {
	/// The root directory record seeded into every new filesystem.
	pub fn root() -> Self {
		let now = now_millis();
		Self {
			name: String::new(),
			path: "/".to_string(),
			is_leaf: false,
			parent_path: None,
			created_at: now,
			updated_at: now,
		}
	}

	/// A new leaf directly under `parent_path`.
	pub fn new_leaf(name: &str, path: &str, parent_path: &str) -> Self {
		let now = now_millis();
		Self {
			name: name.to_string(),
			path: path.to_string(),
			is_leaf: true,
			parent_path: Some(parent_path.to_string()),
			created_at: now,
			updated_at: now,
		}
	}

	/// A new directory directly under `parent_path`.
	pub fn new_directory(name: &str, path: &str, parent_path: &str) -> Self {
		Self {
			is_leaf: false,
			..Self::new_leaf(name, path, parent_path)
		}
	}

	pub fn is_root(&self) -> bool {
		self.parent_path.is_none()
	}
}

/// The opaque body of one leaf, keyed by the leaf's path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
	pub leaf_path: String,
	pub content: String,
}

/// A leaf joined with its content, as returned by file reads.
///
/// A leaf whose content record is missing still reads successfully with
/// `content: None`; a sweep restores the pairing invariant later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
	#[serde(flatten)]
	pub entity: Entity,
	pub content: Option<String>,
}
