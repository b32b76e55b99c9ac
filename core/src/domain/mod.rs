//! Domain records persisted in a filesystem database

pub mod entity;
pub mod lock;

pub use entity::{ContentRecord, Entity, FileRecord};
pub use lock::LockRecord;

/// Millisecond epoch timestamp used for all persisted times.
pub fn now_millis() -> i64 {
	chrono::Utc::now().timestamp_millis()
}
