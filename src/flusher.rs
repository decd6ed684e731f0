//! Single-writer persistence of completed chunks
//!
//! The flusher is the only component that writes artifacts or touches the
//! ledger. A chunk is flushed in three steps: every artifact is written, every
//! summary is recorded, then the ledger snapshot is rewritten. If any step
//! fails, the artifacts already written for the chunk are removed again and
//! any artifacts they replaced are moved back, so a later run neither skips an
//! item missing from the ledger nor keeps a ledger entry without its artifact.

use crate::collaborators::ArtifactCodec;
use crate::error::{Error, Result};
use crate::ledger::{LedgerEntry, SummaryLedger};
use crate::pool::Refined;
use crate::progress::artifact_file;
use crate::types::ItemId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key under which `id` is recorded in the ledger and reports
///
/// Purely numeric ids get `marker` in front so table tools keep them as text.
///
/// # Examples
///
/// ```
/// use recon_batch::flusher::ledger_key;
/// use recon_batch::ItemId;
///
/// assert_eq!(ledger_key(&ItemId::from("10235"), "X"), "X10235");
/// assert_eq!(ledger_key(&ItemId::from("E_coli"), "X"), "E_coli");
/// ```
pub fn ledger_key(id: &ItemId, marker: &str) -> String {
    if id.is_numeric() {
        format!("{marker}{id}")
    } else {
        id.to_string()
    }
}

/// Classify a codec failure as a persist failure, keeping its path if it has one
fn as_persist(path: &Path, error: Error) -> Error {
    match error {
        Error::Persist { .. } => error,
        other => Error::persist(path, other),
    }
}

/// An artifact written during the current flush
struct Staged {
    path: PathBuf,
    /// Where the artifact it replaced was moved to, if there was one
    backup: Option<PathBuf>,
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Persists chunk results and checkpoints the ledger
pub struct ChunkFlusher<A: Send + Sync + 'static> {
    codec: Arc<dyn ArtifactCodec<A>>,
    output_dir: PathBuf,
    translated_dir: PathBuf,
    numeric_id_marker: String,
}

impl<A: Send + Sync + 'static> ChunkFlusher<A> {
    /// Create a flusher writing refined artifacts to `output_dir` and
    /// translated ones to `translated_dir`
    pub fn new(
        codec: Arc<dyn ArtifactCodec<A>>,
        output_dir: impl Into<PathBuf>,
        translated_dir: impl Into<PathBuf>,
        numeric_id_marker: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            output_dir: output_dir.into(),
            translated_dir: translated_dir.into(),
            numeric_id_marker: numeric_id_marker.into(),
        }
    }

    /// Persist one chunk and rewrite the ledger snapshot
    ///
    /// Returns the number of items flushed. After this returns `Ok`, the chunk
    /// is durably done.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persist`] if an artifact or the snapshot cannot be
    /// written. The chunk's new artifacts are removed, any artifacts they
    /// replaced are restored, and the previous snapshot stays in place.
    pub async fn flush(&self, chunk: Vec<Refined<A>>, ledger: &mut SummaryLedger) -> Result<usize> {
        let mut staged: Vec<Staged> = Vec::with_capacity(chunk.len());

        if let Err(e) = self.write_artifacts(&chunk, &mut staged).await {
            roll_back(&staged).await;
            return Err(e);
        }

        let mut next = ledger.clone();
        for refined in &chunk {
            next.insert(LedgerEntry {
                id: refined.item.id.clone(),
                key: ledger_key(&refined.item.id, &self.numeric_id_marker),
                record: refined.summary.clone(),
            });
        }

        if let Err(e) = next.save().await {
            roll_back(&staged).await;
            return Err(e);
        }
        *ledger = next;
        discard_backups(&staged).await;

        info!(
            items = chunk.len(),
            ledger_entries = ledger.len(),
            "Chunk flushed"
        );
        Ok(chunk.len())
    }

    async fn write_artifacts(&self, chunk: &[Refined<A>], staged: &mut Vec<Staged>) -> Result<()> {
        let ext = self.codec.extension();
        for refined in chunk {
            let id = &refined.item.id;

            let path = artifact_file(&self.output_dir, id, ext);
            self.store(path, &refined.artifact, staged).await?;

            if let Some(translated) = &refined.translated {
                let path = artifact_file(&self.translated_dir, id, ext);
                self.store(path, translated, staged).await?;
            }

            debug!(item_id = %id, translated = refined.translated.is_some(), "Artifact persisted");
        }
        Ok(())
    }

    /// Write one artifact, first moving any existing file at `path` aside
    async fn store(&self, path: PathBuf, artifact: &A, staged: &mut Vec<Staged>) -> Result<()> {
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::persist(&path, e))?;
        let backup = if exists {
            let backup = backup_path(&path);
            tokio::fs::rename(&path, &backup)
                .await
                .map_err(|e| Error::persist(&path, e))?;
            Some(backup)
        } else {
            None
        };

        let result = self.codec.store(&path, artifact).await;
        staged.push(Staged { path: path.clone(), backup });
        result.map_err(|e| as_persist(&path, e))
    }
}

async fn roll_back(staged: &[Staged]) {
    for entry in staged.iter().rev() {
        if let Err(e) = tokio::fs::remove_file(&entry.path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %entry.path.display(), error = %e, "Failed to roll back artifact");
        }
        if let Some(backup) = &entry.backup
            && let Err(e) = tokio::fs::rename(backup, &entry.path).await
        {
            warn!(
                path = %entry.path.display(),
                backup = %backup.display(),
                error = %e,
                "Failed to restore replaced artifact"
            );
        }
    }
}

async fn discard_backups(staged: &[Staged]) {
    for backup in staged.iter().filter_map(|entry| entry.backup.as_ref()) {
        if let Err(e) = tokio::fs::remove_file(backup).await {
            warn!(path = %backup.display(), error = %e, "Failed to remove replaced artifact");
        }
    }
}
