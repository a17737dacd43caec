//! Server-side copy tests.

#[cfg(test)]
mod tests {
    use rustack_transfer_core::progress::ProgressEventCode;
    use rustack_transfer_core::{Transfer, TransferError, TransferState};
    use rustack_transfer_memory::MemoryStorageConfig;
    use rustack_transfer_model::{CopyObjectRequest, ObjectMetadata, ObjectStorage, PutObjectRequest};

    use crate::{BUCKET, PART_SIZE, bytes, codes, content, manager, recorder, storage};

    #[tokio::test]
    async fn test_should_copy_small_object_in_one_request() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let data = content(2000);
        storage.insert_object(BUCKET, "src/a.bin", data.clone());

        let copy = manager
            .copy(
                CopyObjectRequest::builder()
                    .source_bucket(BUCKET)
                    .source_key("src/a.bin")
                    .destination_bucket("archive")
                    .destination_key("dst/a.bin")
                    .build(),
            )
            .await
            .expect("start copy");
        let result = copy.wait_for_copy_result().await.expect("copy result");

        assert_eq!(copy.state(), TransferState::Completed);
        assert_eq!(
            copy.description(),
            format!("Copying object from {BUCKET}/src/a.bin to archive/dst/a.bin")
        );
        assert_eq!(result.destination_bucket, "archive");
        assert_eq!(result.destination_key, "dst/a.bin");
        assert!(!result.etag.contains('-'));
        assert_eq!(storage.copy_part_calls(), 0);
        assert_eq!(
            storage.object_data("archive", "dst/a.bin").as_deref(),
            Some(data.as_slice())
        );
        assert_eq!(copy.progress().bytes_transferred(), 2000);
    }

    #[tokio::test]
    async fn test_should_report_every_copy_event_to_early_listener() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        storage.insert_object(BUCKET, "src/b.bin", content(1500));
        let (events, listener) = recorder();

        let copy = manager
            .copy_with_listener(
                CopyObjectRequest::builder()
                    .source_bucket(BUCKET)
                    .source_key("src/b.bin")
                    .destination_bucket(BUCKET)
                    .destination_key("dst/b.bin")
                    .build(),
                listener,
            )
            .await
            .expect("start copy");
        copy.wait_for_completion().await.expect("copy");

        assert_eq!(
            codes(&events),
            vec![ProgressEventCode::Started, ProgressEventCode::Completed]
        );
        assert_eq!(bytes(&events), 1500);
    }

    #[tokio::test]
    async fn test_should_copy_large_object_in_parts_keeping_encryption_metadata() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let data = content(5 * PART_SIZE as usize);
        let mut metadata = ObjectMetadata {
            content_type: Some("video/mp4".to_owned()),
            ..ObjectMetadata::default()
        };
        metadata.insert_user_metadata("x-amz-iv", "aXY=");
        metadata.insert_user_metadata("owner", "alice");
        storage
            .put_object(
                PutObjectRequest::builder()
                    .bucket(BUCKET)
                    .key("movie.mp4")
                    .body(data.clone().into())
                    .metadata(metadata)
                    .build(),
            )
            .await
            .expect("put source");

        let copy = manager
            .copy(
                CopyObjectRequest::builder()
                    .source_bucket(BUCKET)
                    .source_key("movie.mp4")
                    .destination_bucket(BUCKET)
                    .destination_key("backup/movie.mp4")
                    .build(),
            )
            .await
            .expect("start copy");
        let result = copy.wait_for_copy_result().await.expect("copy result");

        assert!(result.etag.ends_with("-5\""));
        assert_eq!(storage.copy_part_calls(), 5);
        assert!(storage.upload_ids().is_empty());
        assert_eq!(
            storage.object_data(BUCKET, "backup/movie.mp4").as_deref(),
            Some(data.as_slice())
        );
        let copied = storage
            .object_metadata(BUCKET, "backup/movie.mp4")
            .expect("copied metadata");
        assert_eq!(copied.content_type.as_deref(), Some("video/mp4"));
        assert_eq!(copied.user_metadata_value("x-amz-iv"), Some("aXY="));
        assert_eq!(copied.user_metadata_value("owner"), None);
        assert_eq!(copy.progress().bytes_transferred(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_should_fail_copy_and_abort_session() {
        let storage = storage(MemoryStorageConfig::default());
        storage.fail_part(2);
        let manager = manager(&storage);
        storage.insert_object(BUCKET, "big", content(6 * PART_SIZE as usize));

        let copy = manager
            .copy(
                CopyObjectRequest::builder()
                    .source_bucket(BUCKET)
                    .source_key("big")
                    .destination_bucket(BUCKET)
                    .destination_key("big-copy")
                    .build(),
            )
            .await
            .expect("start copy");
        let err = copy.wait_for_completion().await.expect_err("part 2 fails");

        assert!(matches!(err, TransferError::Storage(_)));
        assert_eq!(copy.state(), TransferState::Failed);
        assert_eq!(storage.abort_calls(), 1);
        assert!(storage.object_data(BUCKET, "big-copy").is_none());
    }

    #[tokio::test]
    async fn test_should_require_every_copy_name() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);

        let err = manager
            .copy(
                CopyObjectRequest::builder()
                    .source_bucket(BUCKET)
                    .source_key("")
                    .destination_bucket(BUCKET)
                    .destination_key("dst")
                    .build(),
            )
            .await
            .expect_err("empty source key");

        let TransferError::InvalidArgument(message) = err else {
            panic!("expected an invalid argument error");
        };
        assert_eq!(
            message,
            "The source object key must be specified when a copy request is initiated."
        );
    }

    #[tokio::test]
    async fn test_should_fail_fast_for_missing_copy_source() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);

        let err = manager
            .copy(
                CopyObjectRequest::builder()
                    .source_bucket(BUCKET)
                    .source_key("nope")
                    .destination_bucket(BUCKET)
                    .destination_key("dst")
                    .build(),
            )
            .await
            .expect_err("missing source");

        assert!(matches!(err, TransferError::Storage(ref e) if e.is_not_found()));
    }
}
