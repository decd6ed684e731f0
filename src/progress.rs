//! Completed-work detection
//!
//! An item is done when its refined artifact exists in the output directory.
//! The artifact is only written by the flusher, and the ledger snapshot that
//! follows it is the checkpoint, so artifact presence is what resume relies on.

use crate::error::{Error, Result};
use crate::types::{Item, ItemId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Path of the artifact file for `id` inside `dir`
pub(crate) fn artifact_file(dir: &Path, id: &ItemId, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", id, extension))
}

/// Items still requiring work after a progress check
#[derive(Debug, Clone, Default)]
pub struct Pending {
    /// Items to process, in the original order
    pub items: Vec<Item>,
    /// Items skipped because their artifact already exists
    pub already_done: usize,
}

/// Inspects the output directory for previously produced artifacts
#[derive(Debug, Clone)]
pub struct ProgressStore {
    output_dir: PathBuf,
    extension: String,
}

impl ProgressStore {
    /// Progress store over `output_dir`, recognising files with `extension`
    pub fn new(output_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            extension: extension.into(),
        }
    }

    /// Where the artifact for `id` is written
    pub fn artifact_path(&self, id: &ItemId) -> PathBuf {
        artifact_file(&self.output_dir, id, &self.extension)
    }

    /// Ids whose artifact already exists in the output directory
    ///
    /// Only regular files carrying the artifact extension count; anything else
    /// in the directory is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the directory is missing or unreadable.
    pub async fn completed_ids(&self) -> Result<HashSet<ItemId>> {
        let mut entries = tokio::fs::read_dir(&self.output_dir)
            .await
            .map_err(|e| Error::discovery(&self.output_dir, e))?;

        let mut done = HashSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::discovery(&self.output_dir, e))?
        {
            let path = entry.path();
            let has_extension = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension));
            if !has_extension {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| Error::discovery(&path, e))?
                .is_file();
            if !is_file {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                done.insert(ItemId::from(stem));
            }
        }

        Ok(done)
    }

    /// Drop items whose artifact already exists, unless `overwrite` is set
    pub async fn pending(&self, items: Vec<Item>, overwrite: bool) -> Result<Pending> {
        if overwrite {
            return Ok(self.split_pending(items, &HashSet::new(), true));
        }
        let done = self.completed_ids().await?;
        Ok(self.split_pending(items, &done, false))
    }

    /// Drop items whose id is in `done`, unless `overwrite` is set
    ///
    /// `done` is normally the result of [`completed_ids`](Self::completed_ids),
    /// read once and shared with ledger reconciliation so both agree on what
    /// counts as persisted.
    pub fn split_pending(&self, items: Vec<Item>, done: &HashSet<ItemId>, overwrite: bool) -> Pending {
        if overwrite {
            return Pending {
                items,
                already_done: 0,
            };
        }

        let total = items.len();
        let items: Vec<Item> = items
            .into_iter()
            .filter(|item| !done.contains(&item.id))
            .collect();
        let already_done = total - items.len();

        info!(
            output_dir = %self.output_dir.display(),
            already_done,
            remaining = items.len(),
            "Progress check complete"
        );

        Pending {
            items,
            already_done,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InputFormat;
    use tempfile::TempDir;

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter()
            .map(|id| Item {
                id: ItemId::from(*id),
                source_path: PathBuf::from(format!("/in/{id}.mat")),
                format: InputFormat::Primary,
            })
            .collect()
    }

    #[tokio::test]
    async fn missing_output_dir_is_discovery_error() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("absent"), "mat");
        let err = store.pending(items(&["a"]), false).await.unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
    }

    #[tokio::test]
    async fn completed_ids_strip_extension_and_ignore_other_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mat"), b"").unwrap();
        std::fs::write(dir.path().join("b.MAT"), b"").unwrap();
        std::fs::write(dir.path().join("c.tmp"), b"").unwrap();
        std::fs::create_dir(dir.path().join("d.mat")).unwrap();

        let store = ProgressStore::new(dir.path(), "mat");
        let done = store.completed_ids().await.unwrap();
        assert_eq!(done.len(), 2);
        assert!(done.contains(&ItemId::from("a")));
        assert!(done.contains(&ItemId::from("b")));
    }

    #[tokio::test]
    async fn pending_removes_done_items_and_keeps_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.mat"), b"").unwrap();
        std::fs::write(dir.path().join("d.mat"), b"").unwrap();

        let store = ProgressStore::new(dir.path(), "mat");
        let pending = store
            .pending(items(&["a", "b", "c", "d", "e"]), false)
            .await
            .unwrap();

        let ids: Vec<&str> = pending.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "e"]);
        assert_eq!(pending.already_done, 2);
    }

    #[tokio::test]
    async fn overwrite_returns_candidates_unchanged() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mat"), b"").unwrap();

        let store = ProgressStore::new(dir.path().join("never-read"), "mat");
        let pending = store.pending(items(&["a", "b"]), true).await.unwrap();
        assert_eq!(pending.items.len(), 2);
        assert_eq!(pending.already_done, 0);
    }

    #[test]
    fn artifact_path_uses_id_and_extension() {
        let store = ProgressStore::new("/out", "mat");
        assert_eq!(
            store.artifact_path(&ItemId::from("m1")),
            PathBuf::from("/out/m1.mat")
        );
    }
}
