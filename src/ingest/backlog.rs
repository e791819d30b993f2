//! Filestore backlog scanner.
//!
//! Walks the filestore for residual payload files the live ingest missed:
//! on startup, and again on the rescan control events. Candidates whose
//! magic does not pass the filter are deleted together with their sidecars;
//! everything else is enqueued once per existing sidecar. The scan only
//! returns once every event it posted has been processed.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::filestore::{self, FilestoreVersion};
use crate::magic::{self, MagicFilter};
use crate::models::FileEvent;
use crate::pipeline::WorkCounter;

/// Walk `file_dir`, re-submitting residual files, then drain to quiescence.
pub async fn build_backlog(
    file_dir: &Path,
    store_version: FilestoreVersion,
    filter: &MagicFilter,
    tx: &mpsc::Sender<FileEvent>,
    pending: &WorkCounter,
) {
    tracing::info!(dir = %file_dir.display(), "building backlog");

    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(file_dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "backlog walk error");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if !filestore::is_payload_candidate(&path) {
            continue;
        }
        let file_magic = magic::magic_from_file(&path);
        if !filter.is_allowed(&file_magic) {
            filestore::delete_file_set(&path, store_version);
        } else {
            candidates.push(path);
        }
    }

    for path in candidates {
        submit_sidecar_events(&path, store_version, tx, pending).await;
    }

    pending.wait_idle().await;
    tracing::info!("finished building backlog");
}

/// Enqueue one event per existing sidecar of the payload: V2 JSON sidecars
/// carry their parsed contents as the metadata blob, the V1 metafile carries
/// its raw text.
async fn submit_sidecar_events(
    path: &Path,
    store_version: FilestoreVersion,
    tx: &mpsc::Sender<FileEvent>,
    pending: &WorkCounter,
) {
    for sidecar in filestore::sidecars_for(path, FilestoreVersion::V2) {
        let data = match tokio::fs::read(&sidecar).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(sidecar = %sidecar.display(), error = %e, "could not read sidecar");
                continue;
            }
        };
        let parsed: serde_json::Value = match serde_json::from_slice(&data) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(sidecar = %sidecar.display(), error = %e, "could not parse sidecar");
                continue;
            }
        };
        tracing::debug!(sidecar = %sidecar.display(), "found sidecar, submitting");
        enqueue(
            FileEvent::with_metadata(store_version, path.to_path_buf(), parsed),
            tx,
            pending,
        )
        .await;
    }

    let meta = filestore::meta_sidecar_path(path);
    if meta.is_file() {
        match tokio::fs::read_to_string(&meta).await {
            Ok(text) => {
                tracing::debug!(metafile = %meta.display(), "found metafile, submitting");
                enqueue(
                    FileEvent::with_metafile_text(store_version, path.to_path_buf(), text),
                    tx,
                    pending,
                )
                .await;
            }
            Err(e) => {
                tracing::error!(metafile = %meta.display(), error = %e, "could not read metafile");
            }
        }
    }
}

async fn enqueue(event: FileEvent, tx: &mpsc::Sender<FileEvent>, pending: &WorkCounter) {
    pending.add(1);
    if tx.send(event).await.is_err() {
        pending.done();
    }
}
