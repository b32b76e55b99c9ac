//! Canonical path handling for the virtual filesystem
//!
//! Every path stored in a filesystem database is canonical: absolute,
//! `/`-separated, with a trailing `/` for directories and none for files.
//! All user-supplied paths pass through [`normalize`] before they touch
//! the store.

use crate::error::{Result, VzfsError};
use once_cell::sync::Lazy;
use regex::Regex;

/// Character class accepted anywhere in a path.
static PATH_CHARS: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^[A-Za-z0-9_/.\-]+$").expect("static pattern"));

/// Character class accepted for a single entity name.
static NAME_CHARS: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("static pattern"));

/// Sorts after every canonical path character, so `[p, p + SENTINEL)` spans
/// exactly the subtree rooted at `p`.
pub const RANGE_SENTINEL: char = '\u{ffff}';

/// Whether `name` is acceptable as the last segment of an entity path.
pub fn is_valid_name(name: &str) -> bool {
	NAME_CHARS.is_match(name)
}

/// Resolve `input` against the working directory `cwd_pieces` into a
/// canonical absolute path.
///
/// `cwd_pieces` is the segment list of the working directory as produced by
/// [`abs_path_to_pieces`]; the root directory is the empty list.
///
/// The fold works over an accumulator that mirrors the canonical string: a
/// leading empty segment for the root, then one segment per name, then a
/// trailing empty segment iff the path is a directory. The working
/// directory seeds the accumulator with its marker in place, which is what
/// keeps `.` and `..` resolving to directory paths.
pub fn normalize(input: &str, cwd_pieces: &[String]) -> Result<String> {
	if input.is_empty() || input == "/.." {
		return Err(VzfsError::InvalidPath(input.to_string()));
	}
	if !PATH_CHARS.is_match(input) {
		return Err(VzfsError::InvalidPath(input.to_string()));
	}

	let mut input = input.to_string();
	if input == "/." {
		input = "/".to_string();
	}
	// A trailing parent-reference must be folded as a segment, and the
	// directory it resolves to keeps its marker.
	if input == ".." || input.ends_with("/..") {
		input.push('/');
	}

	let raw: Vec<&str> = input.split('/').collect();
	let absolute = raw.first().is_some_and(|segment| segment.is_empty());

	let mut acc: Vec<String> = if absolute {
		vec![String::new()]
	} else {
		let mut acc = Vec::with_capacity(cwd_pieces.len() + 2);
		acc.push(String::new());
		acc.extend(cwd_pieces.iter().cloned());
		// The working directory is itself a directory.
		acc.push(String::new());
		acc
	};

	let last = raw.len() - 1;
	for (position, segment) in raw.iter().enumerate() {
		if segment.is_empty() {
			// Runs of interior separators collapse away; only a trailing
			// empty segment survives, as the directory marker.
			if position == last && position > 0 && acc.last().is_some_and(|s| !s.is_empty()) {
				acc.push(String::new());
			}
			continue;
		}
		match *segment {
			"." => {}
			".." => {
				if acc.last().is_some_and(String::is_empty) && acc.len() > 1 {
					acc.pop();
				}
				if acc.len() <= 1 {
					// Refuse to pop past the root.
					return Err(VzfsError::InvalidPath(input));
				}
				acc.pop();
			}
			name => {
				if acc.last().is_some_and(String::is_empty) && acc.len() > 1 {
					acc.pop();
				}
				acc.push(name.to_string());
			}
		}
	}

	if acc.len() == 1 {
		return Ok("/".to_string());
	}
	Ok(acc.join("/"))
}

/// Split a canonical absolute path back into the segment list accepted by
/// [`normalize`] as a working directory.
pub fn abs_path_to_pieces(path: &str) -> Vec<String> {
	path.split('/')
		.filter(|segment| !segment.is_empty())
		.map(str::to_string)
		.collect()
}

/// Render a working directory segment list as its canonical directory path.
pub fn pieces_to_path(pieces: &[String]) -> String {
	if pieces.is_empty() {
		"/".to_string()
	} else {
		format!("/{}/", pieces.join("/"))
	}
}

/// Longest common leading substring of two canonical paths.
///
/// Used as the single lock prefix for operations that touch two subtrees;
/// a lock on the common prefix covers both of them.
pub fn greatest_common_prefix(a: &str, b: &str) -> String {
	a.chars()
		.zip(b.chars())
		.take_while(|(left, right)| left == right)
		.map(|(left, _)| left)
		.collect()
}
