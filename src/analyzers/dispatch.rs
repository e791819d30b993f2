//! Per-file analyzer dispatch.
//!
//! One call analyses one scan candidate end to end: open, stat, hash,
//! verdict-cache lookup, analyzer loop, persist, submit or enqueue for
//! upload, persist again. The verdict is written once before any external
//! I/O so that a crash between submission and the reported flag never loses
//! the scan result.

use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::analyzers::{AnalyzerRegistry, FileSample};
use crate::db::VerdictStore;
use crate::error::Result;
use crate::filestore;
use crate::magic;
use crate::models::{FileEvent, FileVerdict};
use crate::submit::Submitter;
use crate::upload::Uploader;
use crate::{hashing, sensor};

/// Everything a worker needs to dispatch one event.
pub struct DispatchContext {
    pub registry: Arc<AnalyzerRegistry>,
    pub store: Arc<VerdictStore>,
    pub submitter: Arc<dyn Submitter>,
    pub uploader: Option<Arc<Uploader>>,
    pub sensor_id: String,
    pub rescan_window: chrono::Duration,
}

impl DispatchContext {
    pub fn new(
        registry: Arc<AnalyzerRegistry>,
        store: Arc<VerdictStore>,
        submitter: Arc<dyn Submitter>,
        uploader: Option<Arc<Uploader>>,
        rescan_window: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            store,
            submitter,
            uploader,
            sensor_id: sensor::sensor_id(),
            rescan_window: chrono::Duration::from_std(rescan_window)
                .unwrap_or_else(|_| chrono::Duration::hours(72)),
        }
    }
}

/// Open a sample file and process it with all registered analyzers.
pub async fn analyze_file(ctx: &DispatchContext, event: &FileEvent) -> Result<()> {
    let mut file = tokio::fs::File::open(&event.path).await?;
    let hashes = hashing::hash_reader(&mut file).await?;

    // Skip scanning if this content hash was analysed within the rescan
    // window; a fresh pass only happens once the cached entry goes stale.
    if let Some(entry) = ctx.store.get(&hashes.sha512)? {
        if Utc::now() - entry.time < ctx.rescan_window {
            tracing::debug!(path = %event.path.display(), "sample already processed");
            return Ok(());
        }
    }

    let file = file.into_std().await;
    let metadata = file.metadata()?;
    let collection_time: DateTime<Utc> = metadata.modified()?.into();

    let mut verdict = FileVerdict::default();
    for analyzer in ctx.registry.analyzers() {
        let mut handle = &file;
        if let Err(e) = handle.seek(SeekFrom::Start(0)) {
            tracing::error!(analyzer = analyzer.name(), error = %e, "could not rewind sample");
            continue;
        }
        let sample = FileSample {
            file: &file,
            metadata: &metadata,
            path: &event.path,
        };
        match analyzer.process_file(sample).await {
            Ok(analysis) => {
                if let Some(reason) = analysis.reason {
                    verdict.reasons.insert(analyzer.name().to_string(), reason);
                }
                if analysis.suspicious {
                    verdict.suspicious = true;
                    verdict.suspicious_via.push(analyzer.name().to_string());
                }
            }
            Err(e) => {
                tracing::error!(
                    analyzer = analyzer.name(),
                    path = %event.path.display(),
                    error = %e,
                    "analyzer error processing file"
                );
            }
        }
    }

    verdict.filename = event.path.to_string_lossy().into_owned();
    verdict.time = Utc::now();
    verdict.collection_time = collection_time;
    verdict.sensor_id = ctx.sensor_id.clone();
    verdict.size = metadata.len();
    verdict.hashes = hashes;
    verdict.magic = magic::magic_from_file(&event.path);
    verdict.metadata = event.metadata.clone();

    // First write: the record must exist before any external I/O.
    ctx.store.put(&verdict)?;

    let meta_path = filestore::meta_sidecar_path(&event.path);
    match tokio::fs::read_to_string(&meta_path).await {
        Ok(contents) => verdict.meta_file = Some(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(text) = &event.metafile_text {
                verdict.meta_file = Some(text.clone());
            } else {
                tracing::debug!(path = %meta_path.display(), "metafile not found");
            }
        }
        Err(e) => return Err(e.into()),
    }

    let message = serde_json::to_vec(&verdict)?;

    // Suspicious samples go through the uploader when one is configured; it
    // re-submits the verdict itself after adding the upload location.
    match &ctx.uploader {
        Some(uploader) if verdict.suspicious => {
            uploader.enqueue(verdict.clone(), &event.path).await?;
        }
        _ => {
            ctx.submitter.submit(&message).await?;
        }
    }
    verdict.reported = true;

    // Second write: captures the reported flag and the metafile contents.
    ctx.store.put(&verdict)?;
    Ok(())
}
