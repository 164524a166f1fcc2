//! End-to-end scenarios over a mock-backed mount: cold reads, write
//! and flush, multipart uploads, directory renames, concurrent readers
//! and retry exhaustion.

use std::sync::Arc;
use std::time::Duration;

use qsfs_client::{ClientError, ObjectClient};
use qsfs_drive::DriveError;

use crate::harness::{pattern_bytes, TestMount};

#[tokio::test]
async fn test_cold_read_fetches_sync_range_and_prefetches_rest() {
    let mount = TestMount::new().await;
    let content = pattern_bytes(4096);
    mount.client.seed_file("/a/b.txt", &content);

    let bytes = mount.drive.read_file("/a/b.txt", 0, 1024).await.unwrap();
    assert_eq!(bytes.len(), 1024);
    assert_eq!(bytes, content[..1024]);
    assert!(mount.client.counts().stat >= 1, "the read HEADs the object");

    // the remainder of the object arrives asynchronously
    let cache = Arc::clone(mount.drive.cache());
    let settled = mount
        .wait_for(Duration::from_secs(2), || {
            cache.has_file_data("/a/b.txt", 0, 4096)
        })
        .await;
    assert!(settled, "background download never completed");
    assert_eq!(
        mount.client.counts().get_range,
        2,
        "one sync GET for the requested range, one async GET for the rest"
    );
}

#[tokio::test]
async fn test_write_and_flush_roundtrip() {
    let mount = TestMount::new().await;
    mount.drive.make_file("/x", 0o644, 0).await.unwrap();
    mount.drive.open_file("/x").await.unwrap();
    mount.drive.write_file("/x", 0, b"hello").unwrap();

    let node = mount.drive.find_node("/x").unwrap();
    assert_eq!(node.file_size(), 5);
    assert!(node.is_dirty());

    mount.drive.upload_file("/x").await.unwrap();
    assert_eq!(mount.client.counts().put_object, 1);
    assert_eq!(mount.client.object_data("/x").unwrap(), b"hello");
    assert!(
        !mount.drive.cache().has_file_data("/x", 0, 5),
        "flush erases the cached copy"
    );
}

#[tokio::test]
async fn test_large_upload_goes_multipart() {
    let mount = TestMount::with_options(|options| {
        options.transfer_buf_max_size = 8;
        options.multipart_threshold = 16;
        options.min_part_size = 4;
        options.max_parallel_transfers = 4;
    })
    .await;
    mount.drive.make_file("/big", 0o644, 0).await.unwrap();
    mount.drive.open_file("/big").await.unwrap();
    let content = pattern_bytes(64);
    mount.drive.write_file("/big", 0, &content).unwrap();

    mount.drive.upload_file("/big").await.unwrap();

    let counts = mount.client.counts();
    assert_eq!(counts.initiate_multipart, 1);
    assert_eq!(counts.upload_part, 8, "64 bytes tile into 8 parts of 8");
    assert_eq!(counts.complete_multipart, 1);
    assert_eq!(counts.abort_multipart, 0);
    assert_eq!(counts.put_object, 0);
    assert_eq!(mount.client.object_data("/big").unwrap(), content);
    assert_eq!(mount.drive.unfinished_upload_count(), 0);
}

#[tokio::test]
async fn test_rename_directory_with_children() {
    let mount = TestMount::new().await;
    mount.client.seed_directory("/d/");
    for name in ["one", "two", "three"] {
        mount.client.seed_file(&format!("/d/{}", name), b"x");
    }
    mount.drive.get_children("/d/").await.unwrap();

    mount.drive.rename_directory("/d/", "/e/").await.unwrap();

    assert!(mount.drive.find_node("/d/").is_none());
    let dir = mount.drive.find_node("/e/").unwrap();
    for name in ["one", "two", "three"] {
        let child = mount
            .drive
            .find_node(&format!("/e/{}", name))
            .unwrap_or_else(|| panic!("missing /e/{}", name));
        let parent = child.parent().expect("child keeps a parent");
        assert!(Arc::ptr_eq(&parent, &dir));
    }
    assert!(mount.client.has_object("/e/one"));
    assert!(!mount.client.has_object("/d/one"));
}

#[tokio::test]
async fn test_concurrent_readers_share_one_get() {
    let mount = TestMount::new().await;
    let content = pattern_bytes(1024);
    mount.client.seed_file("/f", &content);
    // resolve the node up front so both readers skip the grow path
    mount.drive.get_node("/f", false).await.unwrap().unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let mut tasks = Vec::new();
    for _ in 0..2 {
        let drive = Arc::clone(&mount.drive);
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            drive.read_file("/f", 0, 1024).await.unwrap()
        }));
    }
    let first = tasks.remove(0).await.unwrap();
    let second = tasks.remove(0).await.unwrap();

    assert_eq!(first, content);
    assert_eq!(first, second);
    assert_eq!(
        mount.client.counts().get_range,
        1,
        "the identical range must be fetched once"
    );
}

#[tokio::test]
async fn test_retry_exhaustion_surfaces_last_error() {
    let mount = TestMount::with_options(|options| {
        options.max_retries = 3;
        options.retry_scale_ms = 10;
    })
    .await;
    mount.client.seed_file("/f", b"data");
    mount.client.inject_errors(
        "get_range",
        ClientError::Timeout {
            context: "injected".into(),
        },
        10,
    );

    let start = std::time::Instant::now();
    let err = mount.drive.read_file("/f", 0, 4).await.unwrap_err();
    assert!(matches!(
        err,
        DriveError::Client(ClientError::Timeout { .. })
    ));
    // backoff of 1x, 2x and 4x the 10ms scale factor ran to exhaustion
    assert!(start.elapsed() >= Duration::from_millis(70));
}

#[tokio::test]
async fn test_upload_then_reread_matches_source() {
    let mount = TestMount::new().await;
    mount.drive.make_file("/f", 0o644, 0).await.unwrap();
    mount.drive.open_file("/f").await.unwrap();
    let content = pattern_bytes(512);
    mount.drive.write_file("/f", 0, &content).unwrap();
    mount.drive.upload_file("/f").await.unwrap();

    // the cache was erased; this read goes back to the store
    let bytes = mount.drive.read_file("/f", 0, 512).await.unwrap();
    assert_eq!(bytes, content);
    assert!(mount.client.counts().get_range >= 1);
}

#[tokio::test]
async fn test_eviction_survives_write_read_roundtrip() {
    let mount = TestMount::with_options(|options| {
        options.max_file_cache_bytes = 64;
        options.page_spill_threshold = 16;
    })
    .await;
    mount.drive.make_file("/a", 0o644, 0).await.unwrap();
    mount.drive.open_file("/a").await.unwrap();
    let content = pattern_bytes(48);
    mount.drive.write_file("/a", 0, &content).unwrap();

    // a second file pressures the budget; /a is dirty and must survive
    mount.client.seed_file("/b", &pattern_bytes(32));
    let _ = mount.drive.read_file("/b", 0, 32).await;

    let bytes = mount.drive.read_file("/a", 0, 48).await.unwrap();
    assert_eq!(bytes, content);
}

#[tokio::test]
async fn test_zero_size_read_returns_without_store_traffic() {
    let mount = TestMount::new().await;
    let before = mount.client.counts();
    let bytes = mount.drive.read_file("/anything", 5, 0).await.unwrap();
    assert!(bytes.is_empty());
    let after = mount.client.counts();
    assert_eq!(before.stat, after.stat);
    assert_eq!(before.get_range, after.get_range);
}

#[tokio::test]
async fn test_read_past_eof_clamps() {
    let mount = TestMount::new().await;
    mount.client.seed_file("/f", b"0123456789");
    let bytes = mount.drive.read_file("/f", 8, 16).await.unwrap();
    assert_eq!(bytes, b"89");
}

#[tokio::test]
async fn test_rename_of_root_is_rejected() {
    let mount = TestMount::new().await;
    assert!(mount.drive.rename_directory("/", "/r/").await.is_err());
    assert!(mount.drive.tree().has("/"));
}

#[tokio::test]
async fn test_mkdir_over_existing_file_is_eexist() {
    let mount = TestMount::new().await;
    mount.client.seed_file("/taken", b"x");
    let err = mount
        .drive
        .make_directory("/taken", 0o755)
        .await
        .unwrap_err();
    assert_eq!(err.to_errno(), libc::EEXIST);
}

#[tokio::test]
async fn test_grow_is_idempotent_through_repeated_listing() {
    let mount = TestMount::new().await;
    mount.client.seed_directory("/d/");
    mount.client.seed_file("/d/f", b"data");
    let first = mount.drive.get_children("/d/").await.unwrap();
    let node_before = mount.drive.find_node("/d/f").unwrap();
    let second = mount.drive.get_children("/d/").await.unwrap();
    let node_after = mount.drive.find_node("/d/f").unwrap();
    assert_eq!(first.len(), second.len());
    assert!(
        Arc::ptr_eq(&node_before, &node_after),
        "re-listing must not replace node identity"
    );
}

#[tokio::test]
async fn test_listing_reflects_external_deletion() {
    let mount = TestMount::new().await;
    mount.client.seed_directory("/d/");
    mount.client.seed_file("/d/gone", b"1");
    mount.client.seed_file("/d/kept", b"2");
    mount.drive.get_children("/d/").await.unwrap();

    // someone else deletes an object and touches the directory
    mount.client.delete_file("/d/gone").await.unwrap();
    mount.client.set_object_mtime("/d/", qsfs_data::unix_now() + 10);

    let children = mount.drive.get_children("/d/").await.unwrap();
    let paths: Vec<String> = children.iter().map(|n| n.path()).collect();
    assert!(paths.contains(&"/d/kept".to_string()));
    assert!(!paths.contains(&"/d/gone".to_string()));
}

#[tokio::test]
async fn test_metadata_registry_shared_between_tree_and_stat() {
    let mount = TestMount::new().await;
    mount.client.seed_file("/f", b"hello");
    let stat = mount.drive.getattr("/f").await.unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(stat.nlink, 1);
    assert!(mount.drive.meta_manager().has("/f"));
}

#[tokio::test]
async fn test_orphan_child_reattaches_after_out_of_order_listing() {
    let mount = TestMount::new().await;
    // the file is resolved before its parent directory ever was
    mount.client.seed_file("/d/f", b"data");
    let (file, _) = mount.drive.get_node("/d/f", false).await.unwrap().unwrap();
    assert!(file.parent().is_none() || file.parent().unwrap().path() == "/d/");

    let (dir, _) = mount.drive.get_node("/d/", false).await.unwrap().unwrap();
    assert!(dir.is_directory());
    let parent = file.parent().expect("orphan adopted by its parent");
    assert!(Arc::ptr_eq(&parent, &dir));
}

#[tokio::test]
async fn test_shutdown_aborts_unfinished_multipart_uploads() {
    let mount = TestMount::with_options(|options| {
        options.transfer_buf_max_size = 8;
        options.multipart_threshold = 16;
        options.min_part_size = 4;
    })
    .await;
    mount.drive.make_file("/big", 0o644, 0).await.unwrap();
    mount.drive.open_file("/big").await.unwrap();
    mount.drive.write_file("/big", 0, &pattern_bytes(64)).unwrap();
    mount.client.inject_error(
        "upload_part",
        ClientError::AccessDenied {
            context: "injected".into(),
        },
    );

    assert!(mount.drive.upload_file("/big").await.is_err());
    assert_eq!(mount.drive.unfinished_upload_count(), 1);
    assert_eq!(mount.client.open_sessions(), 1);

    mount.drive.shutdown().await;
    assert_eq!(mount.drive.unfinished_upload_count(), 0);
    assert_eq!(mount.client.open_sessions(), 0, "shutdown aborts the session");
}
