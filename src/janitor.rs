//! Filestore janitor.
//!
//! Periodic housekeeping over the filestore tree: an age sweep deletes
//! payloads older than the configured maximum, then a space sweep deletes
//! the oldest payloads once the total size exceeds the configured budget.
//! Sidecar files are subordinate: they never count towards the size budget
//! and are removed together with their payload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::filestore;

/// Default interval between janitor passes.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Periodic age- and space-bounded eviction over one directory tree.
pub struct Janitor {
    max_age: Duration,
    max_space_bytes: u64,
    tick: Duration,
}

impl Janitor {
    /// `max_space_mb` is the budget in MiB, matching the `--maxspace` flag.
    pub fn new(max_age: Duration, max_space_mb: u64, tick: Duration) -> Self {
        Self {
            max_age,
            max_space_bytes: max_space_mb * 1024 * 1024,
            tick,
        }
    }

    /// Run the janitor loop on the given directory until shutdown.
    pub fn run(self, directory: PathBuf, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(self.tick) => {
                        self.sweep_age(&directory);
                        self.sweep_space(&directory);
                    }
                }
            }
            tracing::info!("janitor stopped");
        })
    }

    /// Delete every non-sidecar file whose mtime is older than the limit,
    /// along with its sidecars.
    fn sweep_age(&self, directory: &Path) {
        for entry in WalkDir::new(directory) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "janitor walk error");
                    continue;
                }
            };
            if !entry.file_type().is_file() || filestore::is_sidecar(entry.path()) {
                continue;
            }
            let Some(age) = file_age(entry.path()) else {
                continue;
            };
            if age > self.max_age {
                remove_with_sidecars(entry.path());
                tracing::info!(
                    path = %entry.path().display(),
                    age_secs = age.as_secs(),
                    "older than threshold, cleaned"
                );
            }
        }
    }

    /// Delete the oldest non-sidecar files so that the retained set stays
    /// strictly below the space budget. The file whose prefix sum first
    /// crosses the budget is itself deleted.
    fn sweep_space(&self, directory: &Path) {
        let mut files: Vec<(Duration, PathBuf, u64)> = Vec::new();
        for entry in WalkDir::new(directory) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "janitor walk error");
                    continue;
                }
            };
            if !entry.file_type().is_file() || filestore::is_sidecar(entry.path()) {
                continue;
            }
            let Some(age) = file_age(entry.path()) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push((age, entry.into_path(), size));
        }

        files.sort_by_key(|(age, _, _)| *age);

        let mut sum: u64 = 0;
        for (_, path, size) in files {
            sum += size;
            if sum > self.max_space_bytes {
                remove_with_sidecars(&path);
                tracing::info!(
                    path = %path.display(),
                    size,
                    "cleaned to reclaim space"
                );
            }
        }
    }
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}

fn remove_with_sidecars(path: &Path) {
    filestore::remove_tolerant(path);
    for sidecar in filestore::sidecars_any(path) {
        filestore::remove_tolerant(&sidecar);
    }
}
