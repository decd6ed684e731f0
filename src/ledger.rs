//! Persisted mapping from item id to summary record
//!
//! The ledger is the checkpoint of a run. It is loaded once at startup and
//! rewritten in full after every chunk. Writes go to a temporary sibling file
//! that is renamed over the snapshot, so a crash mid-write leaves the previous
//! snapshot in place.

use crate::error::{Error, Result};
use crate::types::{ItemId, SummaryRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One item's entry in the ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Canonical item id, as used for artifact file names
    pub id: ItemId,
    /// Id as shown in summaries and reports (numeric ids carry a marker prefix)
    pub key: String,
    /// Summary record produced by the refiner
    pub record: SummaryRecord,
}

/// On-disk form of the ledger
#[derive(Serialize, Deserialize)]
struct Snapshot {
    resource_version: String,
    updated_at: DateTime<Utc>,
    entries: Vec<LedgerEntry>,
}

/// Insertion-ordered ledger of summary records
#[derive(Debug, Clone)]
pub struct SummaryLedger {
    path: PathBuf,
    resource_version: String,
    entries: Vec<LedgerEntry>,
    index: HashMap<ItemId, usize>,
}

impl SummaryLedger {
    /// Empty ledger that will be saved to `path`
    pub fn new(path: impl Into<PathBuf>, resource_version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            resource_version: resource_version.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Load the snapshot at `path`, or start empty if there is none
    ///
    /// # Errors
    ///
    /// Fails if the snapshot exists but cannot be read or parsed. A corrupt
    /// checkpoint is never silently discarded.
    pub async fn open(path: impl Into<PathBuf>, resource_version: impl Into<String>) -> Result<Self> {
        let mut ledger = Self::new(path, resource_version);

        let bytes = match tokio::fs::read(&ledger.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %ledger.path.display(), "No ledger snapshot, starting empty");
                return Ok(ledger);
            }
            Err(e) => return Err(Error::discovery(&ledger.path, e)),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.resource_version != ledger.resource_version {
            warn!(
                path = %ledger.path.display(),
                found = %snapshot.resource_version,
                expected = %ledger.resource_version,
                "Ledger snapshot carries a different resource version"
            );
        }
        for entry in snapshot.entries {
            ledger.insert(entry);
        }

        info!(
            path = %ledger.path.display(),
            entries = ledger.len(),
            updated_at = %snapshot.updated_at,
            "Loaded ledger snapshot"
        );
        Ok(ledger)
    }

    /// Snapshot file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert an entry, replacing any previous entry for the same id in place
    pub fn insert(&mut self, entry: LedgerEntry) {
        match self.index.get(&entry.id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Entry for `id`, if recorded
    pub fn get(&self, id: &ItemId) -> Option<&LedgerEntry> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    /// Whether `id` is recorded
    pub fn contains(&self, id: &ItemId) -> bool {
        self.index.contains_key(id)
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only entries for which `keep` returns true, returning how many were dropped
    pub fn retain(&mut self, mut keep: impl FnMut(&LedgerEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| keep(entry));
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.id.clone(), pos))
            .collect();
        before - self.entries.len()
    }

    /// Rewrite the whole snapshot to disk
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persist`] if the snapshot cannot be written or moved into place.
    pub async fn save(&self) -> Result<()> {
        let snapshot = Snapshot {
            resource_version: self.resource_version.clone(),
            updated_at: Utc::now(),
            entries: self.entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::persist(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::persist(&self.path, e))?;

        debug!(path = %self.path.display(), entries = self.len(), "Ledger snapshot written");
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SummaryValue;
    use tempfile::TempDir;

    fn entry(id: &str, field: &str, value: SummaryValue) -> LedgerEntry {
        let mut record = SummaryRecord::new();
        record.insert(field.to_string(), value);
        LedgerEntry {
            id: ItemId::from(id),
            key: id.to_string(),
            record,
        }
    }

    #[tokio::test]
    async fn open_without_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = SummaryLedger::open(dir.path().join("summary_R.json"), "R")
            .await
            .unwrap();
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn save_then_open_preserves_order_and_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary_R.json");

        let mut ledger = SummaryLedger::new(&path, "R");
        ledger.insert(entry("zeta", "F", SummaryValue::from("x")));
        ledger.insert(entry("alpha", "F", SummaryValue::from(vec!["y", "z"])));
        ledger.insert(entry("mid", "G", SummaryValue::Number(4.5)));
        ledger.save().await.unwrap();

        let reopened = SummaryLedger::open(&path, "R").await.unwrap();
        let ids: Vec<&str> = reopened.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
        assert_eq!(reopened.entries(), ledger.entries());
        assert!(!dir.path().join("summary_R.json.tmp").exists());
    }

    #[test]
    fn insert_overwrites_in_place() {
        let mut ledger = SummaryLedger::new("/unused", "R");
        ledger.insert(entry("a", "F", SummaryValue::from("old")));
        ledger.insert(entry("b", "F", SummaryValue::from("b")));
        ledger.insert(entry("a", "F", SummaryValue::from("new")));

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.entries()[0].id, "a");
        assert_eq!(
            ledger.get(&ItemId::from("a")).unwrap().record["F"],
            SummaryValue::from("new")
        );
    }

    #[test]
    fn retain_rebuilds_index() {
        let mut ledger = SummaryLedger::new("/unused", "R");
        for id in ["a", "b", "c"] {
            ledger.insert(entry(id, "F", SummaryValue::from(id)));
        }

        let dropped = ledger.retain(|e| e.id != "b");
        assert_eq!(dropped, 1);
        assert!(!ledger.contains(&ItemId::from("b")));
        assert_eq!(ledger.get(&ItemId::from("c")).unwrap().key, "c");
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary_R.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let err = SummaryLedger::open(&path, "R").await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[tokio::test]
    async fn save_into_missing_directory_is_persist_error() {
        let dir = TempDir::new().unwrap();
        let ledger = SummaryLedger::new(dir.path().join("missing").join("s.json"), "R");
        let err = ledger.save().await.unwrap_err();
        assert!(matches!(err, Error::Persist { .. }));
    }
}
