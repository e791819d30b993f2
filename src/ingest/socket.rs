//! Unix-socket ingest of fileinfo events.
//!
//! The upstream IDS connects to a local stream socket and writes one JSON
//! record per line for every extracted file. Each line is kept twice: parsed
//! into the fileinfo schema for filtering, and as a free-form JSON value
//! that travels with the event as the raw metadata blob.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::filestore::{self, FilestoreVersion};
use crate::magic::MagicFilter;
use crate::models::FileEvent;
use crate::pipeline::WorkCounter;

#[derive(Debug, Default, Deserialize)]
struct SocketMessageFileinfo {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    file_id: u64,
    #[serde(default)]
    stored: bool,
    #[serde(default)]
    magic: String,
    #[serde(default)]
    sha256: String,
}

#[derive(Debug, Default, Deserialize)]
struct SocketMessage {
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    fileinfo: SocketMessageFileinfo,
}

/// Listener reading line-delimited JSON fileinfo events from a Unix socket.
pub struct SocketInput {
    listener: UnixListener,
    socket_path: PathBuf,
    file_dir: PathBuf,
    store_version: FilestoreVersion,
    filter: Arc<MagicFilter>,
    tx: mpsc::Sender<FileEvent>,
    pending: Arc<WorkCounter>,
}

impl SocketInput {
    /// Bind the listening socket, unlinking a stale filesystem entry first.
    pub fn bind(
        socket_path: &Path,
        file_dir: &Path,
        store_version: FilestoreVersion,
        filter: Arc<MagicFilter>,
        tx: mpsc::Sender<FileEvent>,
        pending: Arc<WorkCounter>,
    ) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            file_dir: file_dir.to_path_buf(),
            store_version,
            filter,
            tx,
            pending,
        })
    }

    /// Run the accept loop until the shutdown signal fires. One connection
    /// is served at a time; the upstream IDS maintains a single connection.
    pub fn run(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tracing::debug!("waiting for new connection");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    accepted = self.listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                self.handle_connection(stream, &mut shutdown).await;
                            }
                            Err(e) => {
                                tracing::info!(error = %e, "accept failed");
                            }
                        }
                    }
                }
            }
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(error = %e, "could not unlink input socket");
                }
            }
            tracing::info!("socket input stopped");
        })
    }

    async fn handle_connection(&self, stream: UnixStream, shutdown: &mut watch::Receiver<bool>) {
        let mut lines = BufReader::new(stream).lines();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => self.handle_line(&line).await,
                        Ok(None) => return,
                        Err(e) => {
                            tracing::info!(error = %e, "socket read failed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(line, error = %e, "could not parse JSON");
                return;
            }
        };
        let message: SocketMessage = match serde_json::from_value(raw.clone()) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(line, error = %e, "could not parse JSON");
                return;
            }
        };
        if message.event_type != "fileinfo" {
            return;
        }
        tracing::debug!(?message, "received fileinfo");

        let allowed = self.filter.is_allowed(&message.fileinfo.magic);
        match self.store_version {
            FilestoreVersion::V1 => {
                let file_path = self
                    .file_dir
                    .join(format!("file.{}", message.fileinfo.file_id));
                if !allowed {
                    tracing::info!(
                        path = %file_path.display(),
                        magic = %message.fileinfo.magic,
                        "filemagic did not match interesting pattern"
                    );
                    filestore::delete_file_set(&file_path, FilestoreVersion::V1);
                } else if message.fileinfo.stored && message.fileinfo.file_id > 0 {
                    self.enqueue(FileEvent::with_metadata(
                        FilestoreVersion::V1,
                        file_path,
                        raw,
                    ))
                    .await;
                } else {
                    tracing::debug!(
                        file_id = message.fileinfo.file_id,
                        filename = %message.fileinfo.filename,
                        stored = message.fileinfo.stored,
                        "ignoring file"
                    );
                }
            }
            FilestoreVersion::V2 => {
                if message.fileinfo.stored
                    && message.fileinfo.sha256.len() > 2
                    && message.fileinfo.sha256.is_ascii()
                {
                    let file_path = self
                        .file_dir
                        .join(&message.fileinfo.sha256[..2])
                        .join(&message.fileinfo.sha256);
                    if !allowed {
                        tracing::info!(
                            path = %file_path.display(),
                            magic = %message.fileinfo.magic,
                            "filemagic did not match interesting pattern"
                        );
                        filestore::delete_file_set(&file_path, FilestoreVersion::V2);
                    } else {
                        self.enqueue(FileEvent::with_metadata(
                            FilestoreVersion::V2,
                            file_path,
                            raw,
                        ))
                        .await;
                    }
                } else {
                    tracing::debug!(
                        sha256 = %message.fileinfo.sha256,
                        filename = %message.fileinfo.filename,
                        stored = message.fileinfo.stored,
                        "ignoring file"
                    );
                }
            }
        }
    }

    async fn enqueue(&self, event: FileEvent) {
        self.pending.add(1);
        if self.tx.send(event).await.is_err() {
            // queue closed during shutdown
            self.pending.done();
        }
    }
}
