//! Cross-transaction lock manager
//!
//! The store only guarantees atomicity inside one transaction, while tree
//! operations interleave reads and writes across many. Mutual exclusion
//! between actors comes from the lock table: an operation claims its
//! target's canonical path as a lock prefix, and the claim covers every
//! descendant of that prefix.
//!
//! Exact-prefix collisions are caught by the store's key uniqueness at
//! insertion. Overlapping prefixes (an ancestor of an already-claimed path)
//! do not collide in the store and are caught after acquisition by
//! re-reading the table, see [`reject_if_conflicting_prefixes`].

use crate::db::{FsDatabase, StoreError};
use crate::domain::{now_millis, LockRecord};
use crate::error::{Result, VzfsError};
use crate::path;
use tracing::{debug, trace, warn};

/// Claim a lock on the normalized form of `target` for `duration_ms`.
///
/// Acquisition is one-shot except for stale rows: when the claim collides
/// with a lock that has already expired, the stale row is deleted and the
/// claim retried exactly once. A second collision, or a collision with a
/// live lock, fails as contention.
pub async fn lock_path(
	db: &FsDatabase,
	cwd_pieces: &[String],
	target: &str,
	duration_ms: i64,
) -> Result<String> {
	let prefix = path::normalize(target, cwd_pieces)?;
	let now = now_millis();

	match db.insert_lock(&LockRecord::new(prefix.clone(), now, duration_ms)).await {
		Ok(()) => {
			trace!(%prefix, "acquired path lock");
			return Ok(prefix);
		}
		Err(StoreError::Constraint { .. }) => {}
		Err(e) => return Err(e.into()),
	}

	// The prefix is taken. Reclaim it iff the holder's lease has lapsed.
	let stale = match db.get_lock(&prefix).await? {
		Some(existing) if existing.is_expired(now) => true,
		Some(_) => false,
		// Released between our collision and this read; still one-shot.
		None => false,
	};
	if !stale {
		return Err(VzfsError::Contended(prefix));
	}

	debug!(%prefix, "reclaiming expired lock");
	db.delete_lock(&prefix).await?;
	let now = now_millis();
	match db.insert_lock(&LockRecord::new(prefix.clone(), now, duration_ms)).await {
		Ok(()) => Ok(prefix),
		Err(StoreError::Constraint { .. }) => Err(VzfsError::Contended(prefix)),
		Err(e) => Err(e.into()),
	}
}

/// Release a lock. Best-effort: a failed release is logged and reported as
/// zero rows removed, never as an error, because every command path releases
/// in its final step regardless of the outcome of the work.
pub async fn remove_lock(db: &FsDatabase, path_prefix: &str) -> u64 {
	match db.delete_lock(path_prefix).await {
		Ok(true) => 1,
		Ok(false) => 0,
		Err(e) => {
			warn!(path_prefix, "failed to release lock: {e}");
			0
		}
	}
}

/// Fail with contention when any other lock claims a proper prefix of one
/// of the just-acquired paths.
///
/// The store only enforces exact-key uniqueness, so an actor holding `/a/`
/// does not stop a second actor from inserting `/a/b/`. The second actor
/// calls this after acquisition: it re-reads the table (restricted to
/// unexpired rows via the expiry index unless `unexpired_only` is off),
/// ignores the locks it just acquired itself, and rejects when a
/// strictly-shorter prefix of an acquired path is held elsewhere.
pub async fn reject_if_conflicting_prefixes(
	db: &FsDatabase,
	just_acquired: &[&str],
	unexpired_only: bool,
) -> Result<()> {
	let now = now_millis();
	let others = if unexpired_only {
		db.get_unexpired_locks(now).await?
	} else {
		db.get_all_locks().await?
	};

	for lock in others {
		if just_acquired.contains(&lock.path_prefix.as_str()) {
			continue;
		}
		for acquired in just_acquired {
			if acquired.starts_with(&lock.path_prefix) {
				debug!(
					held = %lock.path_prefix,
					acquired = %acquired,
					"overlapping lock prefix detected"
				);
				return Err(VzfsError::Contended(acquired.to_string()));
			}
		}
	}
	Ok(())
}

/// Delete every lock whose lease has lapsed, returning how many went.
///
/// Deletions are best-effort: a row that vanishes mid-sweep (another actor
/// pruned or reclaimed it first) is skipped, and a failed deletion is
/// logged without aborting the sweep.
pub async fn prune_expired_locks(db: &FsDatabase) -> Result<u64> {
	let now = now_millis();
	let doomed = db.get_expired_lock_keys(now).await?;
	if doomed.is_empty() {
		return Ok(0);
	}

	let mut pruned = 0;
	for prefix in &doomed {
		match db.delete_lock(prefix).await {
			Ok(true) => pruned += 1,
			Ok(false) => {}
			Err(e) => debug!(%prefix, "failed to prune lock: {e}"),
		}
	}
	debug!(pruned, "pruned expired locks");
	Ok(pruned)
}
