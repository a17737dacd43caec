//! Directory-wide upload and download tests.

#[cfg(test)]
mod tests {
    use std::path::Path;

    use rustack_transfer_core::progress::ProgressEventCode;
    use rustack_transfer_core::{Transfer, TransferError, TransferState};
    use rustack_transfer_memory::MemoryStorageConfig;
    use rustack_transfer_model::ObjectMetadata;

    use crate::{BUCKET, PART_SIZE, bytes, codes, content, manager, recorder, storage, write_file};

    fn populate(dir: &Path) {
        write_file(dir, "a.txt", &content(10));
        write_file(dir, "sub/b.json", &content(20));
        write_file(dir, "sub/deep/c.bin", &content(6 * PART_SIZE as usize));
    }

    #[tokio::test]
    async fn test_should_upload_directory_recursively() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        populate(dir.path());
        let provider = |file: &Path, metadata: &mut ObjectMetadata| {
            let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            metadata.insert_user_metadata("origin", name);
        };
        let (events, listener) = recorder();

        let transfer = manager
            .upload_directory(BUCKET, "backup", dir.path(), true, Some(&provider))
            .await
            .expect("start directory upload");
        transfer.add_progress_listener(listener);
        transfer.wait_for_completion().await.expect("directory upload");

        assert_eq!(transfer.state(), TransferState::Completed);
        assert_eq!(transfer.key_prefix(), "backup/");
        assert_eq!(transfer.sub_transfers().len(), 3);
        assert_eq!(
            transfer.description(),
            format!("Uploading 3 files to {BUCKET}/backup/")
        );
        let total = 30 + 6 * PART_SIZE;
        assert_eq!(transfer.progress().total_bytes_to_transfer(), Some(total));
        assert_eq!(transfer.progress().bytes_transferred(), total);
        assert!(bytes(&events) <= total);

        for (key, len) in [
            ("backup/a.txt", 10),
            ("backup/sub/b.json", 20),
            ("backup/sub/deep/c.bin", 6 * PART_SIZE as usize),
        ] {
            let data = storage.object_data(BUCKET, key).expect("uploaded object");
            assert_eq!(data.len(), len, "{key}");
        }
        let json = storage
            .object_metadata(BUCKET, "backup/sub/b.json")
            .expect("metadata");
        assert_eq!(json.content_type.as_deref(), Some("application/json"));
        assert_eq!(json.user_metadata_value("origin"), Some("b.json"));
    }

    #[tokio::test]
    async fn test_should_upload_only_top_level_files() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        populate(dir.path());

        let transfer = manager
            .upload_directory(BUCKET, "", dir.path(), false, None)
            .await
            .expect("start directory upload");
        transfer.wait_for_completion().await.expect("directory upload");

        assert_eq!(transfer.sub_transfers().len(), 1);
        assert_eq!(storage.object_count(), 1);
        assert!(storage.object_data(BUCKET, "a.txt").is_some());
    }

    #[tokio::test]
    async fn test_should_complete_empty_directory_upload_immediately() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");

        let transfer = manager
            .upload_directory(BUCKET, "empty", dir.path(), true, None)
            .await
            .expect("start directory upload");

        assert_eq!(transfer.state(), TransferState::Completed);
        transfer.wait_for_completion().await.expect("nothing to wait for");
    }

    #[tokio::test]
    async fn test_should_reject_upload_of_non_directory() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "plain.txt", b"hi");

        let err = manager
            .upload_directory(BUCKET, "x", &file, true, None)
            .await
            .expect_err("not a directory");

        let TransferError::InvalidArgument(message) = err else {
            panic!("expected an invalid argument error");
        };
        assert_eq!(message, "Must provide a directory to upload");
    }

    #[tokio::test]
    async fn test_should_download_prefix_skipping_directory_placeholders() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        storage.insert_object(BUCKET, "photos/", Vec::new());
        storage.insert_object(BUCKET, "photos/2024", content(5));
        storage.insert_object(BUCKET, "photos/2024/x.jpg", content(300));
        storage.insert_object(BUCKET, "photos/a.jpg", content(200));
        storage.insert_object(BUCKET, "videos/v.mp4", content(50));
        let (events, listener) = recorder();

        let transfer = manager
            .download_directory(BUCKET, "photos/", dir.path())
            .await
            .expect("start directory download");
        transfer.add_progress_listener(listener);
        transfer.wait_for_completion().await.expect("directory download");

        assert_eq!(transfer.state(), TransferState::Completed);
        assert_eq!(transfer.description(), format!("Downloading from {BUCKET}/photos/"));
        let mut keys: Vec<&str> = transfer.sub_transfers().iter().map(|d| d.key()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["photos/2024/x.jpg", "photos/a.jpg"]);
        assert_eq!(
            std::fs::read(dir.path().join("photos/2024/x.jpg")).expect("x.jpg"),
            content(300)
        );
        assert_eq!(
            std::fs::read(dir.path().join("photos/a.jpg")).expect("a.jpg"),
            content(200)
        );
        assert!(dir.path().join("photos/2024").is_dir());
        assert!(!dir.path().join("videos").exists());
        assert_eq!(transfer.progress().total_bytes_to_transfer(), Some(500));
        assert_eq!(transfer.progress().bytes_transferred(), 500);
        assert!(bytes(&events) <= 500);
        assert!(!codes(&events).contains(&ProgressEventCode::Failed));
    }

    #[tokio::test]
    async fn test_should_follow_listing_pages() {
        let storage = storage(MemoryStorageConfig::builder().page_size(1).build());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        for key in ["logs/2024/jan.log", "logs/2024/feb.log", "logs/a.log", "logs/b.log"] {
            storage.insert_object(BUCKET, key, content(16));
        }

        let transfer = manager
            .download_directory(BUCKET, "logs/", dir.path())
            .await
            .expect("start directory download");
        transfer.wait_for_completion().await.expect("directory download");

        assert_eq!(transfer.sub_transfers().len(), 4);
        for key in ["logs/2024/jan.log", "logs/2024/feb.log", "logs/a.log", "logs/b.log"] {
            assert!(dir.path().join(key).is_file(), "{key}");
        }
    }

    #[tokio::test]
    async fn test_should_cancel_every_sub_download_on_abort() {
        let storage = storage(MemoryStorageConfig::builder().get_latency_ms(500).build());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        for key in ["set/1", "set/2", "set/3"] {
            storage.insert_object(BUCKET, key, content(64));
        }
        let (events, listener) = recorder();

        let transfer = manager
            .download_directory(BUCKET, "set/", dir.path())
            .await
            .expect("start directory download");
        transfer.add_progress_listener(listener);
        transfer.abort();

        assert!(
            transfer
                .sub_transfers()
                .iter()
                .all(|d| d.state() == TransferState::Canceled)
        );
        assert_eq!(transfer.state(), TransferState::Canceled);
        let err = transfer.wait_for_completion().await.expect_err("canceled");
        assert!(err.is_canceled());
        assert_eq!(
            codes(&events)
                .iter()
                .filter(|c| **c == ProgressEventCode::Canceled)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_should_cancel_directory_download_on_forced_shutdown() {
        let storage = storage(MemoryStorageConfig::builder().get_latency_ms(500).build());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        for key in ["batch/1", "batch/2"] {
            storage.insert_object(BUCKET, key, content(32));
        }

        let transfer = manager
            .download_directory(BUCKET, "batch/", dir.path())
            .await
            .expect("start directory download");
        manager.shutdown_now();

        assert!(
            transfer
                .sub_transfers()
                .iter()
                .all(|d| d.state() == TransferState::Canceled)
        );
        assert_eq!(transfer.state(), TransferState::Canceled);
        let err = transfer.wait_for_completion().await.expect_err("canceled");
        assert!(err.is_canceled());
        assert!(transfer.is_done());
    }

    #[tokio::test]
    async fn test_should_fail_aggregate_when_one_download_fails() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        storage.insert_object(BUCKET, "mix/good", content(40));
        storage.insert_object(BUCKET, "mix/bad", content(40));
        storage.corrupt_object(BUCKET, "mix/bad", vec![1u8; 40]);

        let transfer = manager
            .download_directory(BUCKET, "mix/", dir.path())
            .await
            .expect("start directory download");
        let err = transfer.wait_for_completion().await.expect_err("one sub fails");

        assert!(matches!(err, TransferError::IntegrityCheck { .. }));
        assert_eq!(transfer.state(), TransferState::Failed);
        assert!(dir.path().join("mix/good").is_file());
    }
}
