//! Workspace layout and scripted collaborators

use async_trait::async_trait;
use recon_batch::collaborators::{
    DefaultCanonicalizer, Exporter, RawArtifact, RawCodec, RefineContext, Refiner, Translator,
};
use recon_batch::{BatchDriver, Collaborators, Config, Error, Item, SummaryRecord, SummaryValue};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Temp directory with `in/` as input and the default sibling output dirs
pub struct Workspace {
    root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("in")).unwrap();
        Self { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.path().join("in")
    }

    pub fn refined(&self, name: &str) -> PathBuf {
        self.root.path().join("refined").join(name)
    }

    pub fn translated(&self, name: &str) -> PathBuf {
        self.root.path().join("translated").join(name)
    }

    pub fn summary(&self, name: &str) -> PathBuf {
        self.root.path().join("summary").join(name)
    }

    /// Write an input file relative to `in/`
    pub fn add_input(&self, relative: &str, contents: &str) {
        let path = self.input_dir().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    /// Config with every chunk holding `chunk_size` items
    pub fn config(&self, chunk_size: usize) -> Config {
        let mut config = Config::new(self.input_dir());
        config.execution.chunking.large = chunk_size;
        config.execution.chunking.small = chunk_size;
        config
    }

    pub fn read_summary(&self, name: &str) -> String {
        std::fs::read_to_string(self.summary(name)).unwrap()
    }

    /// Sorted file names in `refined/`
    pub fn refined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.root.path().join("refined"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Refiner with a predictable summary per item
///
/// Every item gets:
/// - `size`: byte length of the input
/// - `tags`: one tag per comma-separated word of the input
/// - `untranslatedMets`: `cpd_shared` plus `cpd_<id>`
#[derive(Default)]
pub struct ScriptedRefiner {
    calls: AtomicUsize,
    refined_ids: Mutex<Vec<String>>,
    fail_on: Option<String>,
    stop_on_first_call: Option<CancellationToken>,
}

impl ScriptedRefiner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refiner that fails the item with this id
    pub fn failing_on(id: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(id.to_string()),
            ..Default::default()
        })
    }

    /// Refiner that cancels `token` the first time it is called
    pub fn stopping(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            stop_on_first_call: Some(token),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn refined_ids(&self) -> Vec<String> {
        let mut ids = self.refined_ids.lock().unwrap().clone();
        ids.sort();
        ids
    }
}

#[async_trait]
impl Refiner<RawArtifact> for ScriptedRefiner {
    async fn refine(
        &self,
        item: &Item,
        artifact: RawArtifact,
        _context: &RefineContext,
    ) -> recon_batch::Result<(RawArtifact, SummaryRecord)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.stop_on_first_call {
            token.cancel();
        }
        if self.fail_on.as_deref() == Some(item.id.as_str()) {
            return Err(Error::transformation(&item.id, "solver did not converge"));
        }

        let text = String::from_utf8_lossy(&artifact.0).into_owned();
        let mut summary = SummaryRecord::new();
        summary.insert("size".into(), SummaryValue::Number(artifact.0.len() as f64));
        summary.insert(
            "tags".into(),
            SummaryValue::List(text.split(',').map(str::to_string).collect()),
        );
        summary.insert(
            "untranslatedMets".into(),
            SummaryValue::from(vec!["cpd_shared".to_string(), format!("cpd_{}", item.id)]),
        );

        self.refined_ids.lock().unwrap().push(item.id.to_string());
        let mut refined = b"refined:".to_vec();
        refined.extend_from_slice(&artifact.0);
        Ok((RawArtifact(refined), summary))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Translator that upper-cases the refined bytes
pub struct UpperTranslator;

#[async_trait]
impl Translator<RawArtifact> for UpperTranslator {
    async fn translate(&self, _item: &Item, artifact: &RawArtifact) -> recon_batch::Result<RawArtifact> {
        Ok(RawArtifact(artifact.0.to_ascii_uppercase()))
    }
}

/// Exporter that records its arguments
#[derive(Default)]
pub struct RecordingExporter {
    pub calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

#[async_trait]
impl Exporter for RecordingExporter {
    async fn export(&self, source: &Path, destination: &Path) -> recon_batch::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((source.to_path_buf(), destination.to_path_buf()));
        Ok(())
    }
}

pub fn collaborators(refiner: Arc<ScriptedRefiner>) -> Collaborators<RawArtifact> {
    Collaborators {
        codec: Arc::new(RawCodec::new("mat")),
        refiner,
        translator: Some(Arc::new(UpperTranslator)),
        exporter: None,
        canonicalizer: Arc::new(DefaultCanonicalizer),
    }
}

pub fn driver(config: Config, refiner: Arc<ScriptedRefiner>) -> BatchDriver<RawArtifact> {
    BatchDriver::new(config, collaborators(refiner)).unwrap()
}
