//! Input discovery and deduplication
//!
//! Scans the input directory recursively, keeps files with an accepted
//! extension, derives a canonical id per file and drops later files whose id
//! was already taken. Discovery order is the walk order with entries sorted by
//! file name, so the surviving duplicate is stable across runs.

use crate::collaborators::Canonicalizer;
use crate::config::FormatsConfig;
use crate::error::{Error, Result};
use crate::types::{InputFormat, Item, ItemId};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Result of an input scan
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Items with unique ids, in discovery order
    pub items: Vec<Item>,
    /// Files dropped because an earlier file had the same id
    pub duplicates_dropped: usize,
    /// Files dropped because their id was empty or not a plain file stem
    pub unusable_dropped: usize,
}

impl Resolution {
    /// Ids of the resolved items, in order
    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.items.iter().map(|item| &item.id)
    }
}

/// Turns an input directory into a deduplicated item list
pub struct ItemResolver {
    canonicalizer: Arc<dyn Canonicalizer>,
    formats: FormatsConfig,
}

impl ItemResolver {
    /// Create a resolver for the given formats
    pub fn new(canonicalizer: Arc<dyn Canonicalizer>, formats: FormatsConfig) -> Self {
        Self {
            canonicalizer,
            formats,
        }
    }

    /// Format of a file, or `None` when its extension is not accepted
    pub fn classify(&self, path: &Path) -> Option<InputFormat> {
        let ext = path.extension()?.to_str()?;
        let matches = |list: &[String]| list.iter().any(|e| e.eq_ignore_ascii_case(ext));
        if matches(&self.formats.primary_extensions) {
            Some(InputFormat::Primary)
        } else if matches(&self.formats.secondary_extensions) {
            Some(InputFormat::Secondary)
        } else {
            None
        }
    }

    /// Scan `root` and return its unique items
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if `root` does not exist, is not a directory
    /// or cannot be read. Unreadable entries below the root are skipped with a
    /// warning.
    pub fn resolve(&self, root: &Path) -> Result<Resolution> {
        let meta = std::fs::metadata(root).map_err(|e| Error::discovery(root, e))?;
        if !meta.is_dir() {
            return Err(Error::discovery(root, "not a directory"));
        }

        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut resolution = Resolution::default();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(Error::discovery(root, e)),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable input entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(format) = self.classify(path) else {
                continue;
            };
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "Skipping input with non UTF-8 name");
                continue;
            };

            let id = self.canonicalizer.canonicalize(name);
            if !is_usable_id(&id) {
                warn!(path = %path.display(), item_id = %id, "Skipping input whose id cannot name an artifact file");
                resolution.unusable_dropped += 1;
                continue;
            }
            if !seen.insert(id.clone()) {
                debug!(item_id = %id, path = %path.display(), "Dropping duplicate input");
                resolution.duplicates_dropped += 1;
                continue;
            }

            resolution.items.push(Item {
                id,
                source_path: path.to_path_buf(),
                format,
            });
        }

        info!(
            root = %root.display(),
            items = resolution.items.len(),
            duplicates_dropped = resolution.duplicates_dropped,
            "Input scan complete"
        );
        if resolution.duplicates_dropped > 0 {
            warn!(
                duplicates_dropped = resolution.duplicates_dropped,
                "Inputs with colliding ids were dropped, first occurrence kept"
            );
        }

        Ok(resolution)
    }
}

/// Whether `id` can be used as the stem of an artifact file name
///
/// Empty ids, ids with path separators and ids starting with a dot are
/// rejected: their artifacts would not be found again on resume.
fn is_usable_id(id: &ItemId) -> bool {
    let id = id.as_str();
    !id.is_empty() && !id.starts_with('.') && !id.contains(['/', '\\'])
}

/// Write the identifier-mapping file: a header row then one id per line
pub fn write_info_file<'a>(
    path: &Path,
    label: &str,
    ids: impl IntoIterator<Item = &'a ItemId>,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::persist(parent, e))?;
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|e| Error::persist(path, e))?;
    writer
        .write_record([label])
        .map_err(|e| Error::persist(path, e))?;
    for id in ids {
        writer
            .write_record([id.as_str()])
            .map_err(|e| Error::persist(path, e))?;
    }
    writer.flush().map_err(|e| Error::persist(path, e))?;
    Ok(())
}
