//! Durable sample uploader.
//!
//! Suspicious samples are mirrored to an S3-compatible object store. The
//! scratch directory is the durability boundary: payload and verdict are
//! copied there before a job counts as enqueued, and they are only removed
//! after both objects uploaded. On startup every `*.verdict.json` left in
//! the scratch directory is re-enqueued with its companion payload, which
//! makes the queue survive restarts and crashes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use s3::creds::Credentials;
use s3::{Bucket, Region};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{AppError, Result};
use crate::models::FileVerdict;
use crate::submit::Submitter;

/// Capacity of the in-memory upload job channel.
const QUEUE_CAPACITY: usize = 10_000;

const VERDICT_SUFFIX: &str = ".verdict.json";

/// Connection settings for the object store.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Endpoint as `host:port`, without scheme.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub use_ssl: bool,
    pub scratch_dir: PathBuf,
}

/// One enqueued upload: a verdict plus the two scratch files backing it.
#[derive(Debug)]
struct UploadJob {
    verdict: FileVerdict,
    payload_path: PathBuf,
    verdict_path: PathBuf,
}

/// Queued uploader of suspicious samples to an S3 endpoint.
pub struct Uploader {
    bucket: Box<Bucket>,
    config: UploadConfig,
    submitter: Option<Arc<dyn Submitter>>,
    tx: Mutex<Option<mpsc::Sender<UploadJob>>>,
    done: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Uploader {
    /// Create the uploader, re-enqueue the scratch-dir backlog and start the
    /// upload worker.
    pub async fn new(
        config: UploadConfig,
        submitter: Option<Arc<dyn Submitter>>,
    ) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(&config.scratch_dir).await?;

        let scheme = if config.use_ssl { "https" } else { "http" };
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: format!("{scheme}://{}", config.endpoint),
        };
        let credentials = Credentials::new(
            Some(config.access_key.as_str()),
            Some(config.secret_key.as_str()),
            None,
            None,
            None,
        )?;
        let bucket = Bucket::new(&config.bucket, region, credentials)?.with_path_style();

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();
        let uploader = Arc::new(Self {
            bucket,
            config,
            submitter,
            tx: Mutex::new(Some(tx.clone())),
            done: Mutex::new(Some(done_rx)),
        });

        uploader.enqueue_backlog(&tx).await?;
        drop(tx);

        let worker = uploader.clone();
        tokio::spawn(async move {
            worker.process_uploads(rx).await;
            let _ = done_tx.send(());
        });

        Ok(uploader)
    }

    /// Add a sample to the upload queue. The payload is copied into the
    /// scratch directory and fsynced, and the verdict written alongside it,
    /// before the job is queued; only then is the job durable.
    pub async fn enqueue(&self, verdict: FileVerdict, local_path: &Path) -> Result<()> {
        let payload_path = self.config.scratch_dir.join(&verdict.hashes.sha512);
        let mut src = tokio::fs::File::open(local_path).await?;
        let mut dst = tokio::fs::File::create(&payload_path).await?;
        tokio::io::copy(&mut src, &mut dst).await?;
        dst.sync_all().await?;
        dst.shutdown().await?;

        let verdict_path = self
            .config
            .scratch_dir
            .join(format!("{}{VERDICT_SUFFIX}", verdict.hashes.sha512));
        tokio::fs::write(&verdict_path, serde_json::to_vec(&verdict)?).await?;

        let tx = {
            let guard = self.tx.lock().await;
            guard.clone().ok_or(AppError::QueueClosed)?
        };
        tx.send(UploadJob {
            verdict,
            payload_path,
            verdict_path,
        })
        .await
        .map_err(|_| AppError::QueueClosed)
    }

    /// Re-enqueue scratch files left over from a previous run. Orphaned
    /// scratch files of either kind are logged and removed.
    async fn enqueue_backlog(&self, tx: &mpsc::Sender<UploadJob>) -> Result<()> {
        let mut enqueued: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.config.scratch_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(VERDICT_SUFFIX) {
                continue;
            }
            let verdict_path = entry.path();
            let data = tokio::fs::read(&verdict_path).await?;
            let verdict: FileVerdict = match serde_json::from_slice(&data) {
                Ok(verdict) => verdict,
                Err(e) => {
                    tracing::warn!(
                        path = %verdict_path.display(),
                        error = %e,
                        "removing unreadable scratch verdict"
                    );
                    let _ = tokio::fs::remove_file(&verdict_path).await;
                    continue;
                }
            };
            let payload_path = self.config.scratch_dir.join(&verdict.hashes.sha512);
            if !payload_path.is_file() {
                tracing::warn!(
                    path = %verdict_path.display(),
                    "removing orphaned scratch verdict without payload"
                );
                let _ = tokio::fs::remove_file(&verdict_path).await;
                continue;
            }
            tracing::debug!(path = %verdict_path.display(), "enqueuing scratch file");
            enqueued.insert(verdict.hashes.sha512.clone());
            tx.send(UploadJob {
                verdict,
                payload_path,
                verdict_path,
            })
            .await
            .map_err(|_| AppError::QueueClosed)?;
        }

        // second pass: payloads whose verdict file is missing
        let mut entries = tokio::fs::read_dir(&self.config.scratch_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(VERDICT_SUFFIX) || enqueued.contains(name) {
                continue;
            }
            tracing::warn!(
                path = %entry.path().display(),
                "removing orphaned scratch payload without verdict"
            );
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
        Ok(())
    }

    async fn process_uploads(&self, mut rx: mpsc::Receiver<UploadJob>) {
        while let Some(mut job) = rx.recv().await {
            let sha512 = job.verdict.hashes.sha512.clone();
            let verdict_object = format!("{sha512}{VERDICT_SUFFIX}");

            if let Err(e) = self
                .put_file(&job.payload_path, &sha512, "application/octet-stream")
                .await
            {
                tracing::error!(object = %sha512, error = %e, "upload failed");
                continue;
            }
            tracing::info!(object = %sha512, "successfully uploaded sample");

            if let Err(e) = self
                .put_file(&job.verdict_path, &verdict_object, "application/json")
                .await
            {
                tracing::error!(object = %verdict_object, error = %e, "upload failed");
                continue;
            }
            tracing::info!(object = %verdict_object, "successfully uploaded verdict");

            for path in [&job.payload_path, &job.verdict_path] {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        "could not remove uploaded scratch file"
                    );
                }
            }

            job.verdict.uploaded = true;
            job.verdict.upload_location = Some(format!(
                "{}/{}/{}",
                self.config.endpoint, self.config.bucket, sha512
            ));
            if let Some(submitter) = &self.submitter {
                match serde_json::to_vec(&job.verdict) {
                    Ok(message) => {
                        if let Err(e) = submitter.submit(&message).await {
                            tracing::error!(error = %e, "could not submit uploaded verdict");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "could not serialize verdict"),
                }
            }
        }
    }

    async fn put_file(&self, path: &Path, object: &str, content_type: &str) -> Result<()> {
        let content = tokio::fs::read(path).await?;
        tracing::debug!(
            bucket = %self.config.bucket,
            object,
            path = %path.display(),
            "uploading object"
        );
        self.bucket
            .put_object_with_content_type(object, &content, content_type)
            .await?;
        Ok(())
    }

    /// Close the inbound queue and wait for the worker to drain it.
    pub async fn stop(&self) {
        self.tx.lock().await.take();
        let done = self.done.lock().await.take();
        if let Some(done) = done {
            let _ = done.await;
        }
    }
}
