//! Filestore layout adapter.
//!
//! The upstream IDS writes extracted files in one of two directory layouts:
//!
//! - V1: `<root>/file.<n>` with a single opaque sidecar `<payload>.meta`
//! - V2: `<root>/<xx>/<sha256>` (where `<xx>` is the first two hex digits)
//!   with zero or more JSON sidecars `<payload>.<anything>.json`
//!
//! The two layouts are modelled as a tagged variant; deletion and filter
//! logic dispatch on the tag rather than through a common abstraction,
//! since V1 has one opaque sidecar while V2 has many JSON sidecars.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AppError, Result};

/// Version of the filestore directory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilestoreVersion {
    V1,
    V2,
}

impl FilestoreVersion {
    /// Parse the numeric `--storeversion` flag value.
    pub fn from_flag(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(AppError::Config(format!(
                "invalid filestore version: {other}"
            ))),
        }
    }
}

fn payload_v1_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"file\.[0-9]+$").unwrap())
}

fn payload_v2_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9a-fA-F]{2}.[0-9a-fA-F]{64}$").unwrap())
}

fn payload_any_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(file\.[0-9]+|[0-9a-fA-F]{2}.[0-9a-fA-F]{64})$").unwrap())
}

fn sidecar_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.(json|meta)$").unwrap())
}

/// True if `path` looks like an extracted payload of the given layout
/// version. Used as a guard before any deletion.
pub fn matches_payload_path(path: &Path, version: FilestoreVersion) -> bool {
    let s = path.to_string_lossy();
    match version {
        FilestoreVersion::V1 => payload_v1_regex().is_match(&s),
        FilestoreVersion::V2 => payload_v2_regex().is_match(&s),
    }
}

/// True if `path` looks like an extracted payload of either layout version.
/// The backlog scanner uses this to pick scan candidates from a walk.
pub fn is_payload_candidate(path: &Path) -> bool {
    payload_any_regex().is_match(&path.to_string_lossy())
}

/// True if `path` is a sidecar file (`*.meta` or `*.json`).
pub fn is_sidecar(path: &Path) -> bool {
    sidecar_regex().is_match(&path.to_string_lossy())
}

/// Existing sidecar files for the given payload path under the given layout.
pub fn sidecars_for(path: &Path, version: FilestoreVersion) -> Vec<PathBuf> {
    match version {
        FilestoreVersion::V1 => {
            let meta = meta_sidecar_path(path);
            if meta.is_file() {
                vec![meta]
            } else {
                Vec::new()
            }
        }
        FilestoreVersion::V2 => json_sidecars(path),
    }
}

/// All existing sidecars for a payload, regardless of layout version. The
/// janitor removes sidecars of both kinds when it evicts a payload.
pub fn sidecars_any(path: &Path) -> Vec<PathBuf> {
    let mut sidecars = json_sidecars(path);
    let meta = meta_sidecar_path(path);
    if meta.is_file() {
        sidecars.push(meta);
    }
    sidecars
}

/// The V1 `<payload>.meta` sidecar path (whether or not it exists).
pub fn meta_sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".meta");
    PathBuf::from(s)
}

/// All existing V2 `<payload>.<anything>.json` sidecars.
fn json_sidecars(path: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return found;
    };
    let prefix = format!("{}.", name.to_string_lossy());
    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(_) => return found,
    };
    for entry in entries.flatten() {
        let candidate = entry.file_name();
        let candidate = candidate.to_string_lossy();
        if candidate.starts_with(&prefix)
            && candidate.ends_with(".json")
            && candidate.len() > prefix.len() + ".json".len()
        {
            found.push(parent.join(candidate.as_ref()));
        }
    }
    found
}

/// Remove a payload file and its sidecars.
///
/// If the path does not match the version's payload pattern the call is a
/// logged no-op; this guards against deleting unrelated files on malformed
/// events. Missing files are not errors, and other filesystem errors are
/// logged and tolerated.
pub fn delete_file_set(path: &Path, version: FilestoreVersion) {
    tracing::info!(path = %path.display(), "removing file set");
    if !matches_payload_path(path, version) {
        tracing::warn!(
            path = %path.display(),
            "was going to delete file, skipped as it does not look like an extracted file"
        );
        return;
    }

    remove_tolerant(path);
    match version {
        FilestoreVersion::V1 => {
            remove_tolerant(&meta_sidecar_path(path));
        }
        FilestoreVersion::V2 => {
            for sidecar in json_sidecars(path) {
                remove_tolerant(&sidecar);
            }
        }
    }
}

/// Remove a single file, tolerating its absence and logging other errors.
pub fn remove_tolerant(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "missing file to delete");
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "error deleting file");
        }
    }
}
