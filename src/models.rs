//! Wire and storage records for file analysis.
//!
//! `FileVerdict` is both the persisted sample entry (keyed by SHA-512 in the
//! verdict store) and the JSON payload published to the message bus; the
//! field names are part of the wire format and must not change.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filestore::FilestoreVersion;

/// File hash information carried inside a verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashInfo {
    #[serde(rename = "Md5", default)]
    pub md5: String,
    #[serde(rename = "Sha1", default)]
    pub sha1: String,
    #[serde(rename = "Sha256", default)]
    pub sha256: String,
    #[serde(rename = "Sha512", default)]
    pub sha512: String,
    #[serde(rename = "Sha3_512", default)]
    pub sha3_512: String,
}

/// Analysis record for one payload, keyed by its SHA-512 hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVerdict {
    #[serde(rename = "Suspicious", default)]
    pub suspicious: bool,
    #[serde(rename = "SuspiciousVia", default, skip_serializing_if = "Vec::is_empty")]
    pub suspicious_via: Vec<String>,
    #[serde(rename = "Reported", default)]
    pub reported: bool,
    #[serde(rename = "Reasons", default)]
    pub reasons: serde_json::Map<String, Value>,
    #[serde(rename = "SensorID", default)]
    pub sensor_id: String,
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
    #[serde(rename = "CollectionTime")]
    pub collection_time: DateTime<Utc>,
    #[serde(rename = "Filename", default)]
    pub filename: String,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(rename = "MetaFile", default, skip_serializing_if = "Option::is_none")]
    pub meta_file: Option<String>,
    #[serde(rename = "Hashes", default)]
    pub hashes: HashInfo,
    #[serde(rename = "Metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(rename = "Magic", default)]
    pub magic: String,
    #[serde(rename = "Uploaded", default)]
    pub uploaded: bool,
    #[serde(rename = "UploadLocation", default, skip_serializing_if = "Option::is_none")]
    pub upload_location: Option<String>,
}

impl Default for FileVerdict {
    fn default() -> Self {
        Self {
            suspicious: false,
            suspicious_via: Vec::new(),
            reported: false,
            reasons: serde_json::Map::new(),
            sensor_id: String::new(),
            time: DateTime::<Utc>::UNIX_EPOCH,
            collection_time: DateTime::<Utc>::UNIX_EPOCH,
            filename: String::new(),
            size: 0,
            meta_file: None,
            hashes: HashInfo::default(),
            metadata: None,
            magic: String::new(),
            uploaded: false,
            upload_location: None,
        }
    }
}

/// A scan candidate produced by the socket ingest or the backlog scanner.
///
/// At most one of `metadata` (parsed JSON from the live event or a V2
/// sidecar) and `metafile_text` (raw bytes of a V1 sidecar) is set.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub store_version: FilestoreVersion,
    pub path: PathBuf,
    pub metadata: Option<Value>,
    pub metafile_text: Option<String>,
}

impl FileEvent {
    pub fn with_metadata(
        store_version: FilestoreVersion,
        path: PathBuf,
        metadata: Value,
    ) -> Self {
        Self {
            store_version,
            path,
            metadata: Some(metadata),
            metafile_text: None,
        }
    }

    pub fn with_metafile_text(
        store_version: FilestoreVersion,
        path: PathBuf,
        text: String,
    ) -> Self {
        Self {
            store_version,
            path,
            metadata: None,
            metafile_text: Some(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_serializes_wire_field_names() {
        let mut verdict = FileVerdict {
            suspicious: true,
            suspicious_via: vec!["sigscan".into()],
            filename: "/tmp/file.1".into(),
            size: 8,
            ..Default::default()
        };
        verdict.hashes.sha512 = "12345".into();

        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains(r#""Suspicious":true"#));
        assert!(json.contains(r#""SuspiciousVia":["sigscan"]"#));
        assert!(json.contains(r#""Sha512":"12345""#));
        assert!(json.contains(r#""Filename":"/tmp/file.1""#));
        // omitted optional fields must not appear on the wire
        assert!(!json.contains("MetaFile"));
        assert!(!json.contains("UploadLocation"));
    }

    #[test]
    fn verdict_roundtrip() {
        let mut verdict = FileVerdict::default();
        verdict.hashes.sha512 = "abc".into();
        verdict.reasons.insert("sigscan".into(), serde_json::json!({"MatchedRules": ["r1"]}));
        verdict.meta_file = Some("flow metadata".into());
        verdict.upload_location = Some("host:9000/bucket/abc".into());

        let json = serde_json::to_vec(&verdict).unwrap();
        let restored: FileVerdict = serde_json::from_slice(&json).unwrap();
        assert_eq!(restored.hashes.sha512, "abc");
        assert_eq!(restored.meta_file.as_deref(), Some("flow metadata"));
        assert!(restored.reasons.contains_key("sigscan"));
    }

    #[test]
    fn empty_suspicious_via_is_omitted() {
        let verdict = FileVerdict::default();
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(!json.contains("SuspiciousVia"));
    }
}
