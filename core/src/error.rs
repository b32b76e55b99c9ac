//! Unified error handling for the core

use crate::db::StoreError;
use thiserror::Error;

/// Main error type for filesystem operations
#[derive(Error, Debug)]
pub enum VzfsError {
	#[error("invalid path: {0}")]
	InvalidPath(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("not a file: {0}")]
	NotALeaf(String),

	#[error("not a directory: {0}")]
	NotADirectory(String),

	#[error("already exists: {0}")]
	Exists(String),

	#[error("directory is not empty: {0}")]
	NotEmpty(String),

	#[error("directory is already empty: {0}")]
	AlreadyEmpty(String),

	#[error("path is locked by another operation: {0}")]
	Contended(String),

	#[error("no filesystem is initialized")]
	NotInitialized,

	#[error("a filesystem is already initialized")]
	AlreadyInitialized,

	#[error("store error: {0}")]
	Store(#[from] StoreError),
}

impl VzfsError {
	/// Whether this failure can succeed on a plain retry once the
	/// conflicting lock is released or expires.
	pub fn is_contention(&self) -> bool {
		matches!(self, VzfsError::Contended(_))
	}
}

/// Result type alias for filesystem operations
pub type Result<T> = std::result::Result<T, VzfsError>;
