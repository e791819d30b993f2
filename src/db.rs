//! Persistent verdict store.
//!
//! A content-addressed cache of `FileVerdict` records in a single-file
//! embedded key-value database, keyed by SHA-512 hex. The store owns all
//! same-key serialisation; callers hold no external lock.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::Result;
use crate::models::FileVerdict;

/// File name of the database inside the data directory.
pub const DATABASE_NAME: &str = "files.db";

const SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("SAMPLES");

/// SHA-512-keyed persistent store of sample verdicts.
pub struct VerdictStore {
    path: PathBuf,
    db: RwLock<Database>,
}

impl VerdictStore {
    /// Open (or create) the database file under the given data directory.
    pub fn open(data_path: &Path) -> Result<Self> {
        let path = data_path.join(DATABASE_NAME);
        let db = Database::create(&path)?;
        tracing::debug!(path = %path.display(), "verdict database initialized");
        Ok(Self {
            path,
            db: RwLock::new(db),
        })
    }

    /// Upsert a verdict under its SHA-512 key, creating the table if absent.
    pub fn put(&self, verdict: &FileVerdict) -> Result<()> {
        let encoded = serde_json::to_vec(verdict)?;
        let db = self.db.read();
        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(SAMPLES)?;
            table.insert(verdict.hashes.sha512.as_str(), encoded.as_slice())?;
        }
        txn.commit()?;
        tracing::debug!(sha512 = %verdict.hashes.sha512, "stored sample entry");
        Ok(())
    }

    /// Look up a verdict by SHA-512. A missing table counts as "not found",
    /// not as an error: the table only comes into existence with the first
    /// write.
    pub fn get(&self, sha512: &str) -> Result<Option<FileVerdict>> {
        let db = self.db.read();
        let txn = db.begin_read()?;
        let table = match txn.open_table(SAMPLES) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match table.get(sha512)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Drop all stored verdicts by deleting the database file and starting
    /// over. Used by the rescan-from-scratch control event.
    pub fn reset(&self) -> Result<()> {
        let mut db = self.db.write();
        // Unlink while the old handle is still open; the inode is released
        // when the handle is swapped below.
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *db = Database::create(&self.path)?;
        tracing::info!(path = %self.path.display(), "verdict database reset");
        Ok(())
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sha512: &str) -> FileVerdict {
        let mut verdict = FileVerdict {
            filename: "/store/file.1".into(),
            size: 8,
            ..Default::default()
        };
        verdict.hashes.sha512 = sha512.into();
        verdict
    }

    #[test]
    fn missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = VerdictStore::open(dir.path()).unwrap();
        assert!(store.get("deadbeef").unwrap().is_none());
    }

    #[test]
    fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = VerdictStore::open(dir.path()).unwrap();

        store.put(&sample("cafe")).unwrap();
        let restored = store.get("cafe").unwrap().unwrap();
        assert_eq!(restored.hashes.sha512, "cafe");
        assert_eq!(restored.filename, "/store/file.1");
    }

    #[test]
    fn put_overwrites_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = VerdictStore::open(dir.path()).unwrap();

        store.put(&sample("k")).unwrap();
        let mut updated = sample("k");
        updated.reported = true;
        store.put(&updated).unwrap();

        let restored = store.get("k").unwrap().unwrap();
        assert!(restored.reported);
    }

    #[test]
    fn reset_clears_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = VerdictStore::open(dir.path()).unwrap();

        store.put(&sample("gone")).unwrap();
        store.reset().unwrap();
        assert!(store.get("gone").unwrap().is_none());

        // store is usable again after the reset
        store.put(&sample("back")).unwrap();
        assert!(store.get("back").unwrap().is_some());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VerdictStore::open(dir.path()).unwrap();
            store.put(&sample("durable")).unwrap();
        }
        let store = VerdictStore::open(dir.path()).unwrap();
        assert!(store.get("durable").unwrap().is_some());
    }
}
