//! End-to-end command flow against a single actor
//!
//! Drives the full create/read/update/delete cycle, directory listing and
//! cleanup, working-directory semantics, and the rename/move commands.

use std::time::Duration;
use tempfile::tempdir;
use tokio::time::sleep;
use vzfs_core::{Vzfs, VzfsConfig, VzfsError};

fn init_tracing() {
	let _ = tracing_subscriber::fmt::try_init();
}

#[tokio::test]
async fn full_file_lifecycle() {
	init_tracing();
	let data_dir = tempdir().unwrap();
	let vzfs = Vzfs::new(VzfsConfig::new(data_dir.path()));

	vzfs.init("vzfs_test", 1).await.unwrap();

	// A fresh filesystem has an empty root and the cwd starts there.
	let record = vzfs.get_directory_record(None, None).await.unwrap();
	assert_eq!(record.cwd, "/");
	assert!(record.child_keys.is_empty());
	assert_eq!(record.entity.path, "/");

	// Create against the cwd-relative parent ".".
	let new_path = vzfs
		.create_file("test.txt", ".", "test content", None)
		.await
		.unwrap();
	assert_eq!(new_path, "/test.txt");

	let file = vzfs.read_file("/test.txt", None).await.unwrap();
	assert_eq!(file.entity.path, "/test.txt");
	assert_eq!(file.entity.name, "test.txt");
	assert!(file.entity.is_leaf);
	assert_eq!(file.entity.parent_path.as_deref(), Some("/"));
	assert_eq!(file.content.as_deref(), Some("test content"));

	// Touch: content stays, the modification time moves forward.
	sleep(Duration::from_millis(5)).await;
	vzfs.update_file_timestamp("/test.txt", None).await.unwrap();
	let touched = vzfs.read_file("/test.txt", None).await.unwrap();
	assert_eq!(touched.content.as_deref(), Some("test content"));
	assert!(touched.entity.updated_at > file.entity.updated_at);
	assert_eq!(touched.entity.created_at, file.entity.created_at);

	vzfs.update_file_content("/test.txt", "hello warld", None)
		.await
		.unwrap();
	let updated = vzfs.read_file("/test.txt", None).await.unwrap();
	assert_eq!(updated.content.as_deref(), Some("hello warld"));

	vzfs.delete_file("/test.txt", None).await.unwrap();
	assert!(matches!(
		vzfs.read_file("/test.txt", None).await,
		Err(VzfsError::NotFound(_))
	));

	vzfs.close().await.unwrap();
}

#[tokio::test]
async fn directory_lifecycle() {
	init_tracing();
	let data_dir = tempdir().unwrap();
	let vzfs = Vzfs::new(VzfsConfig::new(data_dir.path()));

	vzfs.init("vzfs_dir_test", 1).await.unwrap();

	let dir_path = vzfs.create_directory("testDir", "/", None).await.unwrap();
	assert_eq!(dir_path, "/testDir/");

	vzfs.create_file("test2.txt", "/testDir/", "z", None)
		.await
		.unwrap();

	let record = vzfs
		.get_directory_record(Some("/testDir/"), None)
		.await
		.unwrap();
	assert_eq!(record.child_keys, vec!["/testDir/test2.txt"]);

	// A populated directory cannot be removed outright.
	assert!(matches!(
		vzfs.delete_directory_if_empty("/testDir/", None).await,
		Err(VzfsError::NotEmpty(_))
	));

	vzfs.empty_directory("/testDir/", None).await.unwrap();
	let emptied = vzfs
		.get_directory_record(Some("/testDir/"), None)
		.await
		.unwrap();
	assert!(emptied.child_keys.is_empty());

	// Emptying twice reports the counterpart condition.
	assert!(matches!(
		vzfs.empty_directory("/testDir/", None).await,
		Err(VzfsError::AlreadyEmpty(_))
	));

	vzfs.delete_directory_if_empty("/testDir/", None)
		.await
		.unwrap();
	let root = vzfs.get_directory_record(Some("/"), None).await.unwrap();
	assert!(root.child_keys.is_empty());

	vzfs.close().await.unwrap();
}

#[tokio::test]
async fn working_directory_semantics() {
	init_tracing();
	let data_dir = tempdir().unwrap();
	let vzfs = Vzfs::new(VzfsConfig::new(data_dir.path()));

	vzfs.init("vzfs_cwd_test", 1).await.unwrap();
	vzfs.create_directory("docs", "/", None).await.unwrap();
	vzfs.create_file("readme.txt", "/", "top", None).await.unwrap();

	// Changing into a file is refused and leaves the cwd alone.
	assert!(matches!(
		vzfs.change_directory("/readme.txt", None).await,
		Err(VzfsError::NotADirectory(_))
	));
	assert!(matches!(
		vzfs.change_directory("/missing/", None).await,
		Err(VzfsError::NotFound(_))
	));

	let cwd = vzfs.change_directory("/docs/", None).await.unwrap();
	assert_eq!(cwd, "/docs/");

	// Relative commands now resolve under the new cwd.
	let created = vzfs.create_file("note.txt", ".", "n", None).await.unwrap();
	assert_eq!(created, "/docs/note.txt");
	let file = vzfs.read_file("note.txt", None).await.unwrap();
	assert_eq!(file.entity.path, "/docs/note.txt");

	let back = vzfs.change_directory("..", None).await.unwrap();
	assert_eq!(back, "/");

	// The cwd (or an ancestor of it) cannot be deleted from this actor.
	vzfs.change_directory("/docs/", None).await.unwrap();
	assert!(matches!(
		vzfs.delete_directory_if_empty("/docs/", None).await,
		Err(VzfsError::InvalidPath(_))
	));

	vzfs.close().await.unwrap();
}

#[tokio::test]
async fn rename_and_move_commands() {
	init_tracing();
	let data_dir = tempdir().unwrap();
	let vzfs = Vzfs::new(VzfsConfig::new(data_dir.path()));

	vzfs.init("vzfs_move_test", 1).await.unwrap();
	vzfs.create_directory("src", "/", None).await.unwrap();
	vzfs.create_directory("dst", "/", None).await.unwrap();
	vzfs.create_file("a.txt", "/src/", "body", None).await.unwrap();

	let renamed = vzfs
		.rename_file("/src/a.txt", "b.txt", None)
		.await
		.unwrap();
	assert_eq!(renamed, "/src/b.txt");
	let file = vzfs.read_file("/src/b.txt", None).await.unwrap();
	assert_eq!(file.content.as_deref(), Some("body"));

	let moved = vzfs.move_file("/src/b.txt", "/dst/", None).await.unwrap();
	assert_eq!(moved, "/dst/b.txt");
	assert!(matches!(
		vzfs.read_file("/src/b.txt", None).await,
		Err(VzfsError::NotFound(_))
	));

	// Move the whole contents of dst back under src.
	vzfs.create_file("c.txt", "/dst/", "c", None).await.unwrap();
	vzfs.move_directory("/dst/", "/src/", None).await.unwrap();

	let src = vzfs.get_directory_record(Some("/src/"), None).await.unwrap();
	assert_eq!(src.child_keys, vec!["/src/b.txt", "/src/c.txt"]);
	let dst = vzfs.get_directory_record(Some("/dst/"), None).await.unwrap();
	assert!(dst.child_keys.is_empty());

	vzfs.close().await.unwrap();
}

#[tokio::test]
async fn kind_mismatches_are_rejected() {
	init_tracing();
	let data_dir = tempdir().unwrap();
	let vzfs = Vzfs::new(VzfsConfig::new(data_dir.path()));

	vzfs.init("vzfs_kind_test", 1).await.unwrap();
	vzfs.create_directory("dir", "/", None).await.unwrap();
	vzfs.create_file("file.txt", "/", "x", None).await.unwrap();

	// File mutations against a directory.
	assert!(matches!(
		vzfs.update_file_content("/dir/", "y", None).await,
		Err(VzfsError::NotALeaf(_))
	));
	assert!(matches!(
		vzfs.update_file_timestamp("/dir/", None).await,
		Err(VzfsError::NotALeaf(_))
	));
	assert!(matches!(
		vzfs.delete_file("/dir/", None).await,
		Err(VzfsError::NotALeaf(_))
	));
	assert!(matches!(
		vzfs.rename_file("/dir/", "other", None).await,
		Err(VzfsError::NotALeaf(_))
	));

	// Directory operations against a file.
	assert!(matches!(
		vzfs.get_directory_record(Some("/file.txt"), None).await,
		Err(VzfsError::NotADirectory(_))
	));
	assert!(matches!(
		vzfs.empty_directory("/file.txt", None).await,
		Err(VzfsError::NotADirectory(_))
	));
	assert!(matches!(
		vzfs.move_directory("/file.txt", "/dir/", None).await,
		Err(VzfsError::NotADirectory(_))
	));

	// A bad replacement name never touches the store.
	assert!(matches!(
		vzfs.rename_file("/file.txt", "bad name", None).await,
		Err(VzfsError::InvalidPath(_))
	));
	let untouched = vzfs.read_file("/file.txt", None).await.unwrap();
	assert_eq!(untouched.content.as_deref(), Some("x"));

	// Reading a directory is total: its record joins with a null body.
	let dir = vzfs.read_file("/dir/", None).await.unwrap();
	assert!(!dir.entity.is_leaf);
	assert_eq!(dir.content, None);

	vzfs.close().await.unwrap();
}

#[tokio::test]
async fn commands_require_an_initialized_filesystem() {
	init_tracing();
	let data_dir = tempdir().unwrap();
	let vzfs = Vzfs::new(VzfsConfig::new(data_dir.path()));

	assert!(matches!(
		vzfs.read_file("/x", None).await,
		Err(VzfsError::NotInitialized)
	));
	assert!(matches!(
		vzfs.close().await,
		Err(VzfsError::NotInitialized)
	));

	vzfs.init("vzfs_state_test", 1).await.unwrap();
	assert!(matches!(
		vzfs.init("vzfs_state_test", 1).await,
		Err(VzfsError::AlreadyInitialized)
	));
	assert!(matches!(
		vzfs.list_filesystems().await,
		Err(VzfsError::AlreadyInitialized)
	));

	vzfs.close().await.unwrap();

	// Closed means uninitialized again.
	let listed = vzfs.list_filesystems().await.unwrap();
	assert_eq!(listed, vec!["vzfs_state_test"]);
}

#[tokio::test]
async fn schema_version_cannot_go_backwards() {
	init_tracing();
	let data_dir = tempdir().unwrap();
	let vzfs = Vzfs::new(VzfsConfig::new(data_dir.path()));

	vzfs.init("vzfs_version_test", 2).await.unwrap();
	vzfs.close().await.unwrap();

	assert!(matches!(
		vzfs.init("vzfs_version_test", 1).await,
		Err(VzfsError::Store(_))
	));

	// The newer version still opens.
	vzfs.init("vzfs_version_test", 2).await.unwrap();
	vzfs.close().await.unwrap();
}
