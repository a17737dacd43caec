//! Single-object download tests.

#[cfg(test)]
mod tests {
    use rustack_transfer_core::progress::ProgressEventCode;
    use rustack_transfer_core::{
        Transfer, TransferError, TransferState, UploadRequest, UploadSource,
    };
    use rustack_transfer_memory::MemoryStorageConfig;
    use rustack_transfer_model::GetObjectRequest;

    use crate::{BUCKET, bytes, codes, content, manager, recorder, storage, write_file};

    #[tokio::test]
    async fn test_should_download_object_to_nested_file() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(3000);
        let etag = storage.insert_object(BUCKET, "reports/q1.csv", data.clone());
        let target = dir.path().join("out/reports/q1.csv");
        let (events, listener) = recorder();

        let download = manager
            .download_with_listener(
                GetObjectRequest::new(BUCKET, "reports/q1.csv"),
                &target,
                listener,
            )
            .await
            .expect("start download");
        download.wait_for_completion().await.expect("download");

        assert_eq!(download.state(), TransferState::Completed);
        assert_eq!(std::fs::read(&target).expect("read target"), data);
        assert_eq!(download.file(), target.as_path());
        assert_eq!(download.object_metadata().etag.as_deref(), Some(etag.as_str()));
        assert_eq!(download.progress().total_bytes_to_transfer(), Some(3000));
        assert_eq!(download.progress().bytes_transferred(), 3000);
        assert_eq!(bytes(&events), 3000);
        assert_eq!(
            codes(&events),
            vec![ProgressEventCode::Started, ProgressEventCode::Completed]
        );
    }

    #[tokio::test]
    async fn test_should_download_requested_range() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(1000);
        storage.insert_object(BUCKET, "blob", data.clone());
        let target = dir.path().join("slice.bin");

        let download = manager
            .download(
                GetObjectRequest::builder()
                    .bucket(BUCKET)
                    .key("blob")
                    .range((100, 199))
                    .build(),
                &target,
            )
            .await
            .expect("start download");
        download.wait_for_completion().await.expect("download");

        assert_eq!(std::fs::read(&target).expect("read target"), &data[100..200]);
        assert_eq!(download.progress().total_bytes_to_transfer(), Some(100));
    }

    #[tokio::test]
    async fn test_should_download_multipart_object_without_md5_check() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(6000);
        let source = write_file(dir.path(), "source.bin", &data);
        manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("assembled.bin")
                    .source(UploadSource::File(source))
                    .build(),
            )
            .await
            .expect("start upload")
            .wait_for_completion()
            .await
            .expect("upload");

        let target = dir.path().join("copy.bin");
        let download = manager
            .download(GetObjectRequest::new(BUCKET, "assembled.bin"), &target)
            .await
            .expect("start download");
        download.wait_for_completion().await.expect("download");

        assert!(
            download
                .object_metadata()
                .etag
                .is_some_and(|etag| etag.contains('-'))
        );
        assert_eq!(std::fs::read(&target).expect("read target"), data);
    }

    #[tokio::test]
    async fn test_should_fail_download_on_checksum_mismatch() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        storage.insert_object(BUCKET, "fragile", content(500));
        assert!(storage.corrupt_object(BUCKET, "fragile", vec![0u8; 500]));
        let (events, listener) = recorder();

        let download = manager
            .download_with_listener(
                GetObjectRequest::new(BUCKET, "fragile"),
                dir.path().join("fragile"),
                listener,
            )
            .await
            .expect("start download");
        let err = download.wait_for_completion().await.expect_err("mismatch");

        assert!(matches!(err, TransferError::IntegrityCheck { ref key, .. } if key == "fragile"));
        assert_eq!(download.state(), TransferState::Failed);
        assert_eq!(codes(&events).last(), Some(&ProgressEventCode::Failed));
    }

    #[tokio::test]
    async fn test_should_skip_checksum_for_ranged_download() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        storage.insert_object(BUCKET, "fragile", content(500));
        storage.corrupt_object(BUCKET, "fragile", vec![0u8; 500]);

        let download = manager
            .download(
                GetObjectRequest::builder()
                    .bucket(BUCKET)
                    .key("fragile")
                    .range((0, 499))
                    .build(),
                dir.path().join("fragile"),
            )
            .await
            .expect("start download");

        download.wait_for_completion().await.expect("no integrity check");
        assert_eq!(download.state(), TransferState::Completed);
    }

    #[tokio::test]
    async fn test_should_fail_fast_for_missing_object() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");

        let err = manager
            .download(GetObjectRequest::new(BUCKET, "missing"), dir.path().join("x"))
            .await
            .expect_err("missing object");

        assert!(matches!(err, TransferError::Storage(ref e) if e.is_not_found()));
        assert!(!dir.path().join("x").exists());
    }

    #[tokio::test]
    async fn test_should_reject_inverted_range() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        storage.insert_object(BUCKET, "blob", content(100));

        let err = manager
            .download(
                GetObjectRequest::builder()
                    .bucket(BUCKET)
                    .key("blob")
                    .range((50, 10))
                    .build(),
                dir.path().join("blob"),
            )
            .await
            .expect_err("inverted range");

        assert!(matches!(err, TransferError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_should_cancel_download_in_flight() {
        let storage = storage(MemoryStorageConfig::builder().get_latency_ms(500).build());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        storage.insert_object(BUCKET, "slow", content(100));
        let target = dir.path().join("slow");

        let download = manager
            .download(GetObjectRequest::new(BUCKET, "slow"), &target)
            .await
            .expect("start download");
        download.abort();

        assert_eq!(download.state(), TransferState::Canceled);
        let err = download.wait_for_completion().await.expect_err("canceled");
        assert!(err.is_canceled());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_should_cancel_download_on_forced_shutdown() {
        let storage = storage(MemoryStorageConfig::builder().get_latency_ms(500).build());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        storage.insert_object(BUCKET, "slow", content(100));
        let (events, listener) = recorder();

        let download = manager
            .download_with_listener(
                GetObjectRequest::new(BUCKET, "slow"),
                dir.path().join("slow"),
                listener,
            )
            .await
            .expect("start download");
        manager.shutdown_now();

        assert_eq!(download.state(), TransferState::Canceled);
        let err = download.wait_for_completion().await.expect_err("canceled");
        assert!(err.is_canceled());
        assert!(download.is_done());
        assert_eq!(codes(&events), vec![ProgressEventCode::Canceled]);
    }
}
