//! Traits and types for delegated per-item work

use crate::config::Config;
use crate::types::{Item, ItemId, SummaryRecord};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Read-only environment handed to every refinement
///
/// Built once per run and shared through an `Arc`. Workers only ever read it,
/// so no refinement can observe another one's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineContext {
    /// Auxiliary data directory, passed through untouched
    pub data_dir: Option<PathBuf>,
    /// Identifier-mapping file for this run
    pub info_file: PathBuf,
    /// Label of the resource being built
    pub resource_version: String,
    /// Optional solver label
    pub solver: Option<String>,
}

impl RefineContext {
    /// Context for a run with the given configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: config.paths.data_dir.clone(),
            info_file: config.info_file(),
            resource_version: config.execution.resource_version.clone(),
            solver: config.execution.solver.clone(),
        }
    }
}

/// Reads and writes artifacts of type `A`
#[async_trait]
pub trait ArtifactCodec<A: Send + Sync + 'static>: Send + Sync {
    /// Load the artifact stored at `path`
    async fn load(&self, path: &Path) -> crate::Result<A>;

    /// Write `artifact` to `path`, replacing any existing file
    async fn store(&self, path: &Path, artifact: &A) -> crate::Result<()>;

    /// Extension (without dot) of the files this codec writes
    fn extension(&self) -> &str;
}

/// The expensive per-item transformation
///
/// Implementations may block or take minutes per item; the worker pool bounds
/// how many run at once.
#[async_trait]
pub trait Refiner<A: Send + Sync + 'static>: Send + Sync {
    /// Refine one artifact, returning the refined artifact and its summary record
    ///
    /// # Errors
    ///
    /// Any error aborts the chunk the item belongs to and the whole run.
    async fn refine(
        &self,
        item: &Item,
        artifact: A,
        context: &RefineContext,
    ) -> crate::Result<(A, SummaryRecord)>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Converts a refined secondary-format artifact into its translated counterpart
#[async_trait]
pub trait Translator<A: Send + Sync + 'static>: Send + Sync {
    /// Translate a refined artifact
    async fn translate(&self, item: &Item, artifact: &A) -> crate::Result<A>;
}

/// Final export of the persisted artifact set to another format
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Export every artifact in `source` into `destination`
    async fn export(&self, source: &Path, destination: &Path) -> crate::Result<()>;
}

/// Derives a canonical id from a file name
///
/// Must be pure and deterministic: the same name always yields the same id.
pub trait Canonicalizer: Send + Sync {
    /// Canonical id for `file_name` (a bare name, not a path)
    fn canonicalize(&self, file_name: &str) -> ItemId;
}

impl<F> Canonicalizer for F
where
    F: Fn(&str) -> ItemId + Send + Sync,
{
    fn canonicalize(&self, file_name: &str) -> ItemId {
        self(file_name)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_derived_from_config() {
        let mut config = Config::new("/data/drafts");
        config.paths.data_dir = Some(PathBuf::from("/data/input"));
        config.execution.solver = Some("glpk".into());

        let context = RefineContext::from_config(&config);
        assert_eq!(context.data_dir, Some(PathBuf::from("/data/input")));
        assert_eq!(context.resource_version, "Reconstructions");
        assert_eq!(context.solver.as_deref(), Some("glpk"));
        assert_eq!(context.info_file, config.info_file());
    }

    #[test]
    fn closures_act_as_canonicalizers() {
        let upper = |name: &str| ItemId::new(name.to_uppercase());
        assert_eq!(upper.canonicalize("abc"), ItemId::from("ABC"));
    }
}
