//! Pause, resume and stale-session cleanup tests.

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::{Duration, Utc};
    use rustack_transfer_core::state::PauseStatus;
    use rustack_transfer_core::{
        PersistableTransfer, PersistableUpload, Transfer, TransferError, TransferState,
        UploadRequest, UploadSource,
    };
    use rustack_transfer_memory::MemoryStorageConfig;
    use rustack_transfer_model::{
        GetObjectRequest, InitiateMultipartUploadRequest, ObjectStorage, UploadPartRequest,
    };

    use crate::{BUCKET, PART_SIZE, THRESHOLD, content, manager, storage, wait_until, write_file};

    #[tokio::test]
    async fn test_should_pause_parallel_upload_and_resume_remaining_parts() {
        let storage = storage(MemoryStorageConfig::builder().part_latency_ms(100).build());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(8 * PART_SIZE as usize);
        let file = write_file(dir.path(), "video.bin", &data);

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("video.bin")
                    .source(UploadSource::File(file.clone()))
                    .build(),
            )
            .await
            .expect("start upload");
        wait_until("the multipart session", || upload.multipart_upload_id().is_some()).await;
        let upload_id = upload.multipart_upload_id().expect("upload id");
        wait_until("two stored parts", || {
            storage.stored_part_numbers(&upload_id).len() >= 2
        })
        .await;

        let token = upload.pause().await.expect("pause");

        assert_eq!(upload.state(), TransferState::Canceled);
        assert_eq!(token.multipart_upload_id, upload_id);
        assert_eq!(token.part_size, PART_SIZE);
        assert_eq!(token.file, file);
        assert!(storage.has_upload(&upload_id));
        assert_eq!(storage.abort_calls(), 0);

        let json = PersistableTransfer::from(token).to_json().expect("serialize");
        let PersistableTransfer::Upload(token) =
            PersistableTransfer::from_json(&json).expect("parse")
        else {
            panic!("expected an upload token");
        };
        // Let aborted part tasks settle before counting what was stored.
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        let stored_before = storage.stored_part_numbers(&upload_id).len();
        let uploads_before = storage.upload_part_calls();

        let resumed = manager.resume_upload(token).await.expect("resume upload");
        let result = resumed.wait_for_upload_result().await.expect("resumed upload");

        assert_eq!(resumed.state(), TransferState::Completed);
        assert_eq!(resumed.multipart_upload_id().as_deref(), Some(upload_id.as_str()));
        assert!(result.etag.ends_with("-8\""));
        assert_eq!(
            storage.object_data(BUCKET, "video.bin").as_deref(),
            Some(data.as_slice())
        );
        assert_eq!(storage.upload_part_calls() - uploads_before, 8 - stored_before);
        assert_eq!(storage.completed_part_orders(), vec![(1..=8).collect::<Vec<u32>>()]);
        assert_eq!(resumed.progress().bytes_transferred(), data.len() as u64);
        assert_eq!(storage.abort_calls(), 0);
    }

    #[tokio::test]
    async fn test_should_complete_resumed_upload_with_parts_sorted() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(6 * PART_SIZE as usize);
        let file = write_file(dir.path(), "gappy.bin", &data);
        let upload_id = storage
            .initiate_multipart_upload(InitiateMultipartUploadRequest {
                bucket: BUCKET.to_owned(),
                key: "gappy.bin".to_owned(),
                ..Default::default()
            })
            .await
            .expect("initiate")
            .upload_id;
        // Parts 1 and 3 were stored before the pause; 2, 4, 5 and 6 were not.
        let part = PART_SIZE as usize;
        for (part_number, offset) in [(1, 0), (3, 2 * part)] {
            storage
                .upload_part(UploadPartRequest {
                    bucket: BUCKET.to_owned(),
                    key: "gappy.bin".to_owned(),
                    upload_id: upload_id.clone(),
                    part_number,
                    body: data[offset..offset + part].to_vec().into(),
                    last_part: false,
                    sse_customer_key: None,
                })
                .await
                .expect("upload part");
        }
        let uploads_before = storage.upload_part_calls();

        let resumed = manager
            .resume_upload(PersistableUpload {
                bucket: BUCKET.to_owned(),
                key: "gappy.bin".to_owned(),
                file,
                multipart_upload_id: upload_id.clone(),
                part_size: PART_SIZE,
                multipart_upload_threshold: THRESHOLD,
            })
            .await
            .expect("resume upload");
        let result = resumed.wait_for_upload_result().await.expect("resumed upload");

        assert_eq!(resumed.state(), TransferState::Completed);
        assert!(result.etag.ends_with("-6\""));
        assert_eq!(storage.upload_part_calls() - uploads_before, 4);
        assert_eq!(storage.completed_part_orders(), vec![(1..=6).collect::<Vec<u32>>()]);
        assert_eq!(
            storage.object_data(BUCKET, "gappy.bin").as_deref(),
            Some(data.as_slice())
        );
        assert_eq!(resumed.progress().bytes_transferred(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_should_not_pause_finished_upload() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "done.txt", b"done");

        let upload = manager
            .upload(
                UploadRequest::builder()
                    .bucket(BUCKET)
                    .key("done.txt")
                    .source(UploadSource::File(file))
                    .build(),
            )
            .await
            .expect("start upload");
        upload.wait_for_completion().await.expect("upload");

        let result = upload.try_pause(true).await;
        assert_eq!(result.status(), PauseStatus::NoEffect);
        assert!(result.into_info_to_resume().is_none());

        let err = upload.pause().await.expect_err("nothing to pause");
        assert!(matches!(err, TransferError::PauseFailed(PauseStatus::NoEffect)));
        assert_eq!(upload.state(), TransferState::Completed);
    }

    #[tokio::test]
    async fn test_should_cancel_unresumable_stream_upload_only_when_forced() {
        let storage = storage(MemoryStorageConfig::builder().part_latency_ms(100).build());
        let manager = manager(&storage);
        let data = content(6000);

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
        wait_until("the multipart session", || upload.multipart_upload_id().is_some()).await;

        let gentle = upload.try_pause(false).await;
        assert_eq!(gentle.status(), PauseStatus::NoEffect);
        assert_eq!(upload.state(), TransferState::InProgress);

        let forced = upload.try_pause(true).await;
        assert_eq!(forced.status(), PauseStatus::Canceled);
        assert!(forced.status().is_canceled());
        assert!(forced.into_info_to_resume().is_none());
        assert_eq!(upload.state(), TransferState::Canceled);
        assert_eq!(storage.abort_calls(), 1);
        assert!(storage.upload_ids().is_empty());

        let err = upload.wait_for_completion().await.expect_err("canceled");
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_should_pause_download_and_append_on_resume() {
        let storage = storage(MemoryStorageConfig::builder().get_latency_ms(300).build());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(3000);
        storage.insert_object(BUCKET, "archive.tar", data.clone());
        let target = dir.path().join("archive.tar");

        let download = manager
            .download(GetObjectRequest::new(BUCKET, "archive.tar"), &target)
            .await
            .expect("start download");
        let token = download.pause().expect("pause download");

        assert_eq!(download.state(), TransferState::Canceled);
        assert_eq!(token.key, "archive.tar");
        assert_eq!(token.file, target);
        assert!(download.pause().is_err());

        // Simulate the bytes a previous run managed to write.
        std::fs::write(&target, &data[..1000]).expect("write partial file");

        let resumed = manager.resume_download(token).await.expect("resume download");
        resumed.wait_for_completion().await.expect("resumed download");

        assert_eq!(resumed.state(), TransferState::Completed);
        assert_eq!(std::fs::read(&target).expect("read target"), data);
        assert_eq!(resumed.progress().bytes_transferred(), 3000);
    }

    #[tokio::test]
    async fn test_should_complete_resumed_download_with_nothing_left() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        let data = content(500);
        storage.insert_object(BUCKET, "full", data.clone());
        let target = write_file(dir.path(), "full", &data);

        let resumed = manager
            .resume_download(rustack_transfer_core::PersistableDownload {
                bucket: BUCKET.to_owned(),
                key: "full".to_owned(),
                version_id: None,
                range: None,
                file: target.clone(),
            })
            .await
            .expect("resume download");
        resumed.wait_for_completion().await.expect("nothing left");

        assert_eq!(resumed.state(), TransferState::Completed);
        assert_eq!(std::fs::read(&target).expect("read target"), data);
        assert_eq!(resumed.progress().bytes_transferred(), 500);
    }

    #[tokio::test]
    async fn test_should_reject_resume_when_file_outgrew_object() {
        let storage = storage(MemoryStorageConfig::default());
        let manager = manager(&storage);
        let dir = tempfile::tempdir().expect("tempdir");
        storage.insert_object(BUCKET, "small", content(10));
        let target = write_file(dir.path(), "small", &content(20));

        let err = manager
            .resume_download(rustack_transfer_core::PersistableDownload {
                bucket: BUCKET.to_owned(),
                key: "small".to_owned(),
                version_id: None,
                range: None,
                file: target,
            })
            .await
            .expect_err("file larger than object");

        assert!(matches!(err, TransferError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_should_abort_only_stale_multipart_uploads() {
        let storage = storage(MemoryStorageConfig::builder().page_size(1).build());
        let manager = manager(&storage);
        let mut ids = Vec::new();
        for key in ["a", "b", "c"] {
            let output = storage
                .initiate_multipart_upload(InitiateMultipartUploadRequest {
                    bucket: BUCKET.to_owned(),
                    key: key.to_owned(),
                    ..Default::default()
                })
                .await
                .expect("initiate");
            ids.push(output.upload_id);
        }
        let two_days_ago = Utc::now() - Duration::days(2);
        assert!(storage.set_upload_initiated(&ids[0], two_days_ago));
        assert!(storage.set_upload_initiated(&ids[2], two_days_ago));

        let aborted = manager
            .abort_multipart_uploads(BUCKET, Utc::now() - Duration::days(1))
            .await
            .expect("abort stale uploads");

        assert_eq!(aborted, 2);
        assert_eq!(storage.upload_ids(), vec![ids[1].clone()]);
    }
}
