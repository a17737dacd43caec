//! Single-object upload tests.

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rustack_transfer_core::progress::ProgressEventCode;
    use rustack_transfer_core::{
        Transfer, TransferError, TransferManagerConfig, TransferState, UploadRequest,
        UploadSource,
    };
    use rustack_transfer_memory::MemoryStorageConfig;

    use crate::{
        BUCKET, PART_SIZE, bytes, codes, content, manager, manager_with, recorder, storage,
        test_config, wait_until, write_file,
    };

    #[tokio::test]
    async fn test_should_upload_small_file_in_one_request() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(100);
        let file = write_file(dir.path(), "notes.txt", &data);
        let (events, listener) = recorder();

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("docs/notes.txt")
                    .source(UploadSource::File(file))
                    .progress_listener(listener)
                    .build(),
            )
            .await
            .expect("start upload");
        let result = upload.wait_for_upload_result().await.expect("upload result");

        assert_eq!(upload.state(), TransferState::Completed);
        assert!(upload.multipart_upload_id().is_none());
        assert_eq!(upload.description(), format!("Uploading to {BUCKET}/docs/notes.txt"));
        assert_eq!(result.key, "docs/notes.txt");
        assert!(!result.etag.contains('-'));
        assert_eq!(storage.put_object_calls(), 1);
        assert_eq!(storage.upload_part_calls(), 0);
        assert_eq!(
            storage.object_data(BUCKET, "docs/notes.txt").as_deref(),
            Some(data.as_slice())
        );
        let metadata = storage
            .object_metadata(BUCKET, "docs/notes.txt")
            .expect("stored metadata");
        assert_eq!(metadata.content_type.as_deref(), Some("text/plain"));

        assert_eq!(
            codes(&events),
            vec![ProgressEventCode::Started, ProgressEventCode::Completed]
        );
        assert_eq!(bytes(&events), 100);
        assert_eq!(upload.progress().bytes_transferred(), 100);
        assert_eq!(upload.progress().percent_transferred(), Some(100.0));
    }

    #[tokio::test]
    async fn test_should_upload_file_at_threshold_in_one_request() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "edge.bin", &content(4096));

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("edge.bin")
                    .source(UploadSource::File(file))
                    .build(),
            )
            .await
            .expect("start upload");
        upload.wait_for_completion().await.expect("upload");

        assert!(upload.multipart_upload_id().is_none());
        assert_eq!(storage.put_object_calls(), 1);
    }

    #[tokio::test]
    async fn test_should_never_deliver_zero_byte_events() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "empty.dat", &[]);
        let (events, listener) = recorder();

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("empty.dat")
                    .source(UploadSource::File(file))
                    .progress_listener(listener)
                    .build(),
            )
            .await
            .expect("start upload");
        upload.wait_for_completion().await.expect("upload");

        assert_eq!(upload.state(), TransferState::Completed);
        assert!(events.lock().iter().all(|e| !e.is_byte_event()));
        assert_eq!(upload.progress().percent_transferred(), Some(100.0));
        assert_eq!(
            storage.object_data(BUCKET, "empty.dat").map(|b| b.len()),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_should_upload_large_file_in_parallel_parts() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(10 * PART_SIZE as usize);
        let file = write_file(dir.path(), "big.bin", &data);
        let (events, listener) = recorder();

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("big.bin")
                    .source(UploadSource::File(file))
                    .progress_listener(listener)
                    .build(),
            )
            .await
            .expect("start upload");
        let result = upload.wait_for_upload_result().await.expect("upload result");

        assert_eq!(upload.state(), TransferState::Completed);
        assert!(upload.multipart_upload_id().is_some());
        assert!(result.etag.ends_with("-10\""));
        assert_eq!(storage.upload_part_calls(), 10);
        assert_eq!(
            storage.completed_part_orders(),
            vec![(1..=10).collect::<Vec<u32>>()]
        );
        assert_eq!(
            storage.object_data(BUCKET, "big.bin").as_deref(),
            Some(data.as_slice())
        );

        let codes = codes(&events);
        assert_eq!(codes.first(), Some(&ProgressEventCode::Started));
        assert_eq!(codes.last(), Some(&ProgressEventCode::Completed));
        assert_eq!(
            codes
                .iter()
                .filter(|c| **c == ProgressEventCode::PartCompleted)
                .count(),
            10
        );
        assert_eq!(bytes(&events), data.len() as u64);
        assert_eq!(upload.progress().bytes_transferred(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_should_upload_stream_serially() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let data = content(5000);

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("stream.bin")
                    .source(UploadSource::Stream {
                        reader: Box::new(Cursor::new(data.clone())),
                        content_length: data.len() as u64,
                    })
                    .build(),
            )
            .await
            .expect("start upload");
        let result = upload.wait_for_upload_result().await.expect("upload result");

        assert!(result.etag.ends_with("-5\""));
        assert_eq!(storage.completed_part_orders(), vec![vec![1, 2, 3, 4, 5]]);
        assert_eq!(
            storage.object_data(BUCKET, "stream.bin").as_deref(),
            Some(data.as_slice())
        );
    }

    #[tokio::test]
    async fn test_should_upload_serially_when_client_encrypts() {
        let storage = storage(
            MemoryStorageConfig::builder()
                .client_side_encryption(true)
                .build(),
        );
        let manager = manager_with(
            &storage,
            TransferManagerConfig {
                minimum_upload_part_size: 1000,
                ..test_config()
            },
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(5000);
        let file = write_file(dir.path(), "secret.bin", &data);
        let (events, listener) = recorder();

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("secret.bin")
                    .source(UploadSource::File(file))
                    .progress_listener(listener)
                    .build(),
            )
            .await
            .expect("start upload");
        upload.wait_for_completion().await.expect("upload");

        // 1000 rounds up to the cipher block multiple 1024: parts of
        // 1024 * 4 + 904.
        assert_eq!(storage.completed_part_orders(), vec![vec![1, 2, 3, 4, 5]]);
        assert_eq!(
            storage.object_data(BUCKET, "secret.bin").as_deref(),
            Some(data.as_slice())
        );
        assert_eq!(
            codes(&events)
                .iter()
                .filter(|c| **c == ProgressEventCode::Completed)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_should_fail_upload_and_abort_session_once() {
        let storage = storage(MemoryStorageConfig::default());
        storage.fail_part(3);
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "big.bin", &content(8 * PART_SIZE as usize));
        let (events, listener) = recorder();

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("big.bin")
                    .source(UploadSource::File(file))
                    .progress_listener(listener)
                    .build(),
            )
            .await
            .expect("start upload");
        let err = upload.wait_for_completion().await.expect_err("part 3 fails");

        assert!(matches!(err, TransferError::Storage(ref e) if e.code() == Some("InternalError")));
        assert_eq!(upload.state(), TransferState::Failed);
        assert_eq!(storage.abort_calls(), 1);
        assert!(storage.upload_ids().is_empty());
        assert!(storage.object_data(BUCKET, "big.bin").is_none());

        let codes = codes(&events);
        assert_eq!(
            codes
                .iter()
                .filter(|c| **c == ProgressEventCode::Failed)
                .count(),
            1
        );
        assert!(codes.contains(&ProgressEventCode::PartFailed));
        assert!(!codes.contains(&ProgressEventCode::Completed));

        // The failure is handed to every later waiter as well.
        assert!(upload.wait_for_exception().await.is_some());
    }

    #[tokio::test]
    async fn test_should_cancel_upload_and_abort_session_once() {
        let storage = storage(MemoryStorageConfig::builder().part_latency_ms(200).build());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "big.bin", &content(10 * PART_SIZE as usize));
        let (events, listener) = recorder();

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("big.bin")
                    .source(UploadSource::File(file))
                    .progress_listener(listener)
                    .build(),
            )
            .await
            .expect("start upload");
        wait_until("the multipart session", || upload.multipart_upload_id().is_some()).await;

        upload.abort().await;

        assert_eq!(upload.state(), TransferState::Canceled);
        let err = upload.wait_for_completion().await.expect_err("canceled");
        assert!(err.is_canceled());

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(storage.abort_calls(), 1);
        assert!(storage.upload_ids().is_empty());
        assert_eq!(storage.complete_calls(), 0);
        assert_eq!(upload.state(), TransferState::Canceled);
        assert_eq!(
            codes(&events)
                .iter()
                .filter(|c| **c == ProgressEventCode::Canceled)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_should_cancel_upload_and_abort_session_on_forced_shutdown() {
        let storage = storage(MemoryStorageConfig::builder().part_latency_ms(300).build());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "big.bin", &content(10 * PART_SIZE as usize));
        let (events, listener) = recorder();

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("big.bin")
                    .source(UploadSource::File(file))
                    .progress_listener(listener)
                    .build(),
            )
            .await
            .expect("start upload");
        wait_until("the multipart session", || upload.multipart_upload_id().is_some()).await;

        manager.shutdown_now();

        assert_eq!(upload.state(), TransferState::Canceled);
        let err = upload.wait_for_completion().await.expect_err("canceled");
        assert!(err.is_canceled());
        assert!(upload.is_done());
        wait_until("the session abort", || storage.abort_calls() == 1).await;
        assert!(storage.upload_ids().is_empty());
        assert_eq!(storage.complete_calls(), 0);
        assert_eq!(
            codes(&events)
                .iter()
                .filter(|c| **c == ProgressEventCode::Canceled)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_should_reject_uploads_after_shutdown() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "late.txt", b"too late");

        manager.shutdown();
        let err = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("late.txt")
                    .source(UploadSource::File(file))
                    .build(),
            )
            .await
            .expect_err("executor is shut down");

        assert!(err.is_canceled());
        assert_eq!(storage.put_object_calls(), 0);
    }

    #[tokio::test]
    async fn test_should_reject_missing_source_file() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");

        let err = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("ghost.txt")
                    .source(UploadSource::File(dir.path().join("ghost.txt")))
                    .build(),
            )
            .await
            .expect_err("no such file");

        assert!(matches!(err, TransferError::Io(_)));
    }
}
