//! Uploader scenarios: scratch durability, startup backlog and orphan
//! cleanup against a stubbed S3 endpoint.

mod common;

use std::sync::Arc;

use common::{create_file_pair, StubS3};
use nightwatch::models::FileVerdict;
use nightwatch::submit::DummySubmitter;
use nightwatch::upload::{UploadConfig, Uploader};

fn suspicious_verdict(sha512: &str) -> FileVerdict {
    let mut verdict = FileVerdict {
        suspicious: true,
        suspicious_via: vec!["test".into()],
        filename: "file.2".into(),
        size: 8,
        ..Default::default()
    };
    verdict
        .reasons
        .insert("test".into(), serde_json::json!("foobar"));
    verdict.hashes.sha512 = sha512.into();
    verdict
}

fn upload_config(endpoint: &str, scratch_dir: std::path::PathBuf) -> UploadConfig {
    UploadConfig {
        endpoint: endpoint.to_string(),
        access_key: "test".into(),
        secret_key: "test".into(),
        bucket: "incoming".into(),
        region: "TEST".into(),
        use_ssl: false,
        scratch_dir,
    }
}

#[tokio::test]
async fn uploads_sample_and_verdict_then_cleans_scratch() {
    let stub = StubS3::start(200).await;
    let in_dir = tempfile::tempdir().unwrap();
    let scratch_dir = tempfile::tempdir().unwrap();

    let uploader = Uploader::new(
        upload_config(&stub.endpoint, scratch_dir.path().to_path_buf()),
        Some(Arc::new(DummySubmitter)),
    )
    .await
    .unwrap();

    let payload = create_file_pair(2, b"foo bar2", in_dir.path());
    uploader
        .enqueue(suspicious_verdict("12345"), &payload)
        .await
        .unwrap();
    uploader.stop().await;

    let sample = stub
        .request_for("/incoming/12345")
        .expect("sample not uploaded");
    assert_eq!(sample.method, "PUT");
    assert_eq!(sample.body, b"foo bar2");

    let verdict = stub
        .request_for("/incoming/12345.verdict.json")
        .expect("verdict not uploaded");
    assert!(String::from_utf8_lossy(&verdict.body).contains("Suspicious"));

    assert!(
        !scratch_dir.path().join("12345").exists(),
        "scratch payload not cleaned"
    );
    assert!(
        !scratch_dir.path().join("12345.verdict.json").exists(),
        "scratch verdict not cleaned"
    );
}

#[tokio::test]
async fn scratch_backlog_is_reenqueued_on_startup() {
    let stub = StubS3::start(200).await;
    let scratch_dir = tempfile::tempdir().unwrap();

    // simulate a crash before upload: both scratch files already on disk
    let verdict = suspicious_verdict("12345");
    std::fs::write(
        scratch_dir.path().join("12345.verdict.json"),
        serde_json::to_vec(&verdict).unwrap(),
    )
    .unwrap();
    std::fs::write(scratch_dir.path().join("12345"), b"foo bar2").unwrap();

    let uploader = Uploader::new(
        upload_config(&stub.endpoint, scratch_dir.path().to_path_buf()),
        Some(Arc::new(DummySubmitter)),
    )
    .await
    .unwrap();

    assert!(stub.wait_for("/incoming/12345").await.is_some());
    assert!(stub.wait_for("/incoming/12345.verdict.json").await.is_some());
    uploader.stop().await;

    assert!(!scratch_dir.path().join("12345").exists());
    assert!(!scratch_dir.path().join("12345.verdict.json").exists());
}

#[tokio::test]
async fn failed_upload_leaves_scratch_files_for_next_start() {
    let stub = StubS3::start(500).await;
    let in_dir = tempfile::tempdir().unwrap();
    let scratch_dir = tempfile::tempdir().unwrap();

    let uploader = Uploader::new(
        upload_config(&stub.endpoint, scratch_dir.path().to_path_buf()),
        None,
    )
    .await
    .unwrap();

    let payload = create_file_pair(2, b"foo bar2", in_dir.path());
    uploader
        .enqueue(suspicious_verdict("12345"), &payload)
        .await
        .unwrap();
    uploader.stop().await;

    // the upload failed, so the durable copies must survive for the backlog
    assert!(scratch_dir.path().join("12345").exists());
    assert!(scratch_dir.path().join("12345.verdict.json").exists());
}

#[tokio::test]
async fn orphaned_scratch_verdict_is_removed() {
    let stub = StubS3::start(200).await;
    let scratch_dir = tempfile::tempdir().unwrap();

    // verdict without companion payload, and payload without verdict
    std::fs::write(
        scratch_dir.path().join("deadbeef.verdict.json"),
        serde_json::to_vec(&suspicious_verdict("deadbeef")).unwrap(),
    )
    .unwrap();
    std::fs::write(scratch_dir.path().join("cafecafe"), b"stray payload").unwrap();

    let uploader = Uploader::new(
        upload_config(&stub.endpoint, scratch_dir.path().to_path_buf()),
        None,
    )
    .await
    .unwrap();
    uploader.stop().await;

    assert!(!scratch_dir.path().join("deadbeef.verdict.json").exists());
    assert!(!scratch_dir.path().join("cafecafe").exists());
    assert!(stub.requests.lock().is_empty(), "orphan must not be uploaded");
}

#[tokio::test]
async fn enqueue_after_stop_fails() {
    let stub = StubS3::start(200).await;
    let in_dir = tempfile::tempdir().unwrap();
    let scratch_dir = tempfile::tempdir().unwrap();

    let uploader = Uploader::new(
        upload_config(&stub.endpoint, scratch_dir.path().to_path_buf()),
        None,
    )
    .await
    .unwrap();
    uploader.stop().await;

    let payload = create_file_pair(3, b"late", in_dir.path());
    assert!(uploader
        .enqueue(suspicious_verdict("fff"), &payload)
        .await
        .is_err());
}
