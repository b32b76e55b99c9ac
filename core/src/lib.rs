//! Persistent, hierarchical, multi-rooted filesystem emulation over an
//! embedded key-value store.
//!
//! Each filesystem is an independently named database holding a rooted tree
//! of directories and files with materialized paths. The store only
//! guarantees atomicity inside one transaction, while filesystem operations
//! interleave reads and writes across many, so mutations are guarded by an
//! advisory lock table keyed by path prefix with expiry-based reclamation.
//!
//! Hosts drive the system through the [`Vzfs`] actor handle: one command at
//! a time, each answered with a typed reply, each internally sequenced as
//! resolve, lock, mutate, release.

pub mod actor;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod integrity;
pub mod locks;
pub mod path;
pub mod tree;

pub use actor::{DirectoryRecord, Vzfs};
pub use config::VzfsConfig;
pub use db::backup::Backup;
pub use db::{FsDatabase, StoreError};
pub use domain::{ContentRecord, Entity, FileRecord, LockRecord};
pub use error::{Result, VzfsError};
