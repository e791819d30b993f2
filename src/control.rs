//! Control plane.
//!
//! Runtime behaviour is driven by a channel of typed control events; the
//! adapter translating OS signals into events lives in `main`, keeping the
//! core independent of signal handling.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::analyzers::AnalyzerRegistry;
use crate::db::VerdictStore;
use crate::error::Result;
use crate::filestore::FilestoreVersion;
use crate::ingest::backlog;
use crate::magic::MagicFilter;
use crate::pipeline::Pipeline;
use crate::submit::Submitter;
use crate::upload::Uploader;

/// Events accepted by the control loop. In the default deployment they are
/// mapped from HUP, USR1, USR2 and TERM/INT respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    ReloadAnalyzers,
    Rescan,
    RescanFromScratch,
    Shutdown,
}

/// Handles to every running component, owned by the control loop.
pub struct Runtime {
    pub registry: Arc<AnalyzerRegistry>,
    pub store: Arc<VerdictStore>,
    pub filter: Arc<MagicFilter>,
    pub pipeline: Pipeline,
    pub submitter: Arc<dyn Submitter>,
    pub uploader: Option<Arc<Uploader>>,
    pub socket_shutdown: watch::Sender<bool>,
    pub socket_task: JoinHandle<()>,
    pub janitor_shutdown: watch::Sender<bool>,
    pub janitor_task: JoinHandle<()>,
    pub file_dir: PathBuf,
    pub store_version: FilestoreVersion,
}

/// Process control events until shutdown.
///
/// A failed analyzer reload is the only non-fatal-looking event that aborts
/// the process: a sensor running without working analyzers is worse than a
/// restart.
pub async fn run(mut events: mpsc::Receiver<ControlEvent>, runtime: Runtime) -> Result<()> {
    let Runtime {
        registry,
        store,
        filter,
        pipeline,
        submitter,
        uploader,
        socket_shutdown,
        socket_task,
        janitor_shutdown,
        janitor_task,
        file_dir,
        store_version,
    } = runtime;

    while let Some(event) = events.recv().await {
        match event {
            ControlEvent::ReloadAnalyzers => {
                tracing::info!("reinitializing analyzers");
                registry.reload().await?;
            }
            ControlEvent::Rescan => {
                tracing::info!(dir = %file_dir.display(), "rescanning");
                backlog::build_backlog(
                    &file_dir,
                    store_version,
                    &filter,
                    &pipeline.sender(),
                    &pipeline.pending(),
                )
                .await;
            }
            ControlEvent::RescanFromScratch => {
                tracing::info!(dir = %file_dir.display(), "rescanning from scratch");
                store.reset()?;
                backlog::build_backlog(
                    &file_dir,
                    store_version,
                    &filter,
                    &pipeline.sender(),
                    &pipeline.pending(),
                )
                .await;
            }
            ControlEvent::Shutdown => {
                tracing::info!("received request to stop, stopping janitor and watcher");
                if let Some(uploader) = &uploader {
                    uploader.stop().await;
                }
                // Producers first: the socket task holds a queue sender, and
                // the workers only drain out once every sender is gone.
                let _ = socket_shutdown.send(true);
                if let Err(e) = socket_task.await {
                    tracing::warn!(error = %e, "socket task join failed");
                }
                pipeline.close().await;
                let _ = janitor_shutdown.send(true);
                if let Err(e) = janitor_task.await {
                    tracing::warn!(error = %e, "janitor task join failed");
                }
                submitter.finish().await;
                tracing::info!("stopped janitor and watcher");
                return Ok(());
            }
        }
    }
    Ok(())
}
