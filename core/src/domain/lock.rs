//! Advisory path-prefix locks
//!
//! A lock row claims a canonical path prefix, and with it the whole subtree
//! below that prefix, for the duration of one multi-transaction operation.
//! The prefix is the primary key, so a second claim on the same prefix
//! collides at insertion. Overlapping prefixes do not collide in the store
//! and are detected by re-reading the table after acquisition.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
	/// Canonical path prefix this lock claims, the primary key
	pub path_prefix: String,

	/// Millisecond epoch after which the lock no longer counts and may be
	/// reaped by any actor
	pub expiry: i64,

	pub created_at: i64,
}

impl LockRecord {
	pub fn new(path_prefix: String, now: i64, duration_ms: i64) -> Self {
		Self {
			path_prefix,
			expiry: now + duration_ms,
			created_at: now,
		}
	}

	pub fn is_expired(&self, now: i64) -> bool {
		self.expiry <= now
	}
}
