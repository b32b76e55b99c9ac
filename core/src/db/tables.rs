//! Table layout of one filesystem database
//!
//! Three object stores plus their secondary indexes. The store engine has no
//! declarative indexes, so each index is a companion table that the
//! primitives in [`store`](super::store) keep in lockstep with the primary
//! row inside the same write transaction. Index tables are named
//! `<store>.<field>` after the field they project.

use redb::{MultimapTableDefinition, TableDefinition};

/// Entity rows, canonical path -> encoded [`Entity`](crate::domain::Entity).
pub const ENTITY: TableDefinition<&str, &[u8]> = TableDefinition::new("entity");

/// Content rows, leaf path -> encoded [`ContentRecord`](crate::domain::ContentRecord).
pub const CONTENT: TableDefinition<&str, &[u8]> = TableDefinition::new("content");

/// Lock rows, path prefix -> encoded [`LockRecord`](crate::domain::LockRecord).
pub const LOCK: TableDefinition<&str, &[u8]> = TableDefinition::new("lock");

/// Database metadata, currently only the schema version.
pub const META: TableDefinition<&str, u32> = TableDefinition::new("meta");

pub const META_SCHEMA_VERSION: &str = "schema_version";

// Entity indexes. The root's missing parent path is not indexed, matching
// engines that skip records without an index key.
pub const ENTITY_BY_NAME: MultimapTableDefinition<&str, &str> =
	MultimapTableDefinition::new("entity.name");
pub const ENTITY_BY_PARENT: MultimapTableDefinition<&str, &str> =
	MultimapTableDefinition::new("entity.parentPath");
pub const ENTITY_BY_CREATED: MultimapTableDefinition<i64, &str> =
	MultimapTableDefinition::new("entity.createdAt");
pub const ENTITY_BY_UPDATED: MultimapTableDefinition<i64, &str> =
	MultimapTableDefinition::new("entity.updatedAt");

/// Unique composite index: no two siblings may share a name.
pub const ENTITY_BY_PARENT_NAME: TableDefinition<(&str, &str), &str> =
	TableDefinition::new("entity.parentPath+name");

// Lock indexes.
pub const LOCK_BY_EXPIRY: MultimapTableDefinition<i64, &str> =
	MultimapTableDefinition::new("lock.expiry");
pub const LOCK_BY_CREATED: MultimapTableDefinition<i64, &str> =
	MultimapTableDefinition::new("lock.createdAt");
