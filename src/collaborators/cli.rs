//! Collaborators backed by external programs
//!
//! Each program receives the artifact bytes on stdin and writes its result to
//! the output path given as the last argument. The refiner additionally prints
//! the summary record as a JSON object on stdout.

use super::raw::RawArtifact;
use super::traits::{Exporter, RefineContext, Refiner, Translator};
use crate::types::{Item, SummaryRecord};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Environment variable carrying the canonical item id
pub const ENV_ITEM_ID: &str = "RECON_ITEM_ID";
/// Environment variable carrying the auxiliary data directory
pub const ENV_DATA_DIR: &str = "RECON_DATA_DIR";
/// Environment variable carrying the identifier-mapping file
pub const ENV_INFO_FILE: &str = "RECON_INFO_FILE";
/// Environment variable carrying the resource version label
pub const ENV_RESOURCE_VERSION: &str = "RECON_RESOURCE_VERSION";
/// Environment variable carrying the solver label
pub const ENV_SOLVER: &str = "RECON_SOLVER";

/// Resolve a program name through PATH unless it already names a file
fn resolve_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    which::which(program).ok()
}

/// Run `command`, feeding `stdin` to it, and collect its output
async fn run_with_stdin(mut command: Command, stdin: Vec<u8>) -> crate::Result<Output> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| crate::Error::ExternalTool(format!("failed to start: {e}")))?;

    let mut pipe = child
        .stdin
        .take()
        .ok_or_else(|| crate::Error::ExternalTool("stdin not captured".to_string()))?;
    let feed = async move {
        let result = pipe.write_all(&stdin).await;
        drop(pipe);
        result
    };

    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    let output = output.map_err(|e| crate::Error::ExternalTool(format!("failed to wait: {e}")))?;

    // Programs that ignore stdin close the pipe early; that is not a failure
    if let Err(e) = fed
        && e.kind() != std::io::ErrorKind::BrokenPipe
    {
        return Err(crate::Error::ExternalTool(format!(
            "failed to write stdin: {e}"
        )));
    }

    Ok(output)
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    match trimmed.char_indices().rev().nth(499) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Read and remove a scratch output file written by an external program
async fn take_scratch_output(path: &Path) -> std::io::Result<RawArtifact> {
    let bytes = tokio::fs::read(path).await?;
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch output");
    }
    Ok(RawArtifact(bytes))
}

/// Refiner that runs an external program per item
///
/// Invocation: `<program> [args...] <source-path> <refined-output-path>`, with
/// the artifact on stdin and the [`RefineContext`] in `RECON_*` environment
/// variables. A non-zero exit status, a missing output file or a stdout that is
/// not a JSON object fails the item.
pub struct CliRefiner {
    binary_path: PathBuf,
    args: Vec<String>,
    scratch_dir: PathBuf,
}

impl CliRefiner {
    /// Create a refiner with an explicit binary path
    ///
    /// Refined outputs are written to `scratch_dir` before being read back.
    pub fn new(binary_path: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            binary_path,
            args: Vec::new(),
            scratch_dir,
        }
    }

    /// Find `program` in PATH (or use it directly if it is a path)
    pub fn from_path(program: &str, scratch_dir: PathBuf) -> Option<Self> {
        resolve_program(program).map(|path| Self::new(path, scratch_dir))
    }

    /// Extra arguments placed before the two path arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl Refiner<RawArtifact> for CliRefiner {
    async fn refine(
        &self,
        item: &Item,
        artifact: RawArtifact,
        context: &RefineContext,
    ) -> crate::Result<(RawArtifact, SummaryRecord)> {
        let scratch = self.scratch_dir.join(format!("{}.refined", item.id));

        let mut command = Command::new(&self.binary_path);
        command
            .args(&self.args)
            .arg(&item.source_path)
            .arg(&scratch)
            .env(ENV_ITEM_ID, item.id.as_str())
            .env(ENV_INFO_FILE, &context.info_file)
            .env(ENV_RESOURCE_VERSION, &context.resource_version);
        if let Some(data_dir) = &context.data_dir {
            command.env(ENV_DATA_DIR, data_dir);
        }
        if let Some(solver) = &context.solver {
            command.env(ENV_SOLVER, solver);
        }

        let output = run_with_stdin(command, artifact.0)
            .await
            .map_err(|e| crate::Error::transformation(&item.id, e))?;

        if !output.status.success() {
            return Err(crate::Error::transformation(
                &item.id,
                format!("refiner exited with {}: {}", output.status, stderr_tail(&output)),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary: SummaryRecord = if stdout.trim().is_empty() {
            SummaryRecord::new()
        } else {
            serde_json::from_str(stdout.trim()).map_err(|e| {
                crate::Error::transformation(&item.id, format!("invalid summary on stdout: {e}"))
            })?
        };

        let refined = take_scratch_output(&scratch).await.map_err(|e| {
            crate::Error::transformation(
                &item.id,
                format!("refined output {} unreadable: {e}", scratch.display()),
            )
        })?;

        Ok((refined, summary))
    }

    fn name(&self) -> &'static str {
        "cli-refiner"
    }
}

/// Translator that runs an external program per secondary-format item
///
/// Invocation: `<program> [args...] <item-id> <translated-output-path>`, with
/// the refined artifact on stdin.
pub struct CliTranslator {
    binary_path: PathBuf,
    args: Vec<String>,
    scratch_dir: PathBuf,
}

impl CliTranslator {
    /// Create a translator with an explicit binary path
    pub fn new(binary_path: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            binary_path,
            args: Vec::new(),
            scratch_dir,
        }
    }

    /// Find `program` in PATH (or use it directly if it is a path)
    pub fn from_path(program: &str, scratch_dir: PathBuf) -> Option<Self> {
        resolve_program(program).map(|path| Self::new(path, scratch_dir))
    }

    /// Extra arguments placed before the two positional arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl Translator<RawArtifact> for CliTranslator {
    async fn translate(&self, item: &Item, artifact: &RawArtifact) -> crate::Result<RawArtifact> {
        let scratch = self.scratch_dir.join(format!("{}.translated", item.id));

        let mut command = Command::new(&self.binary_path);
        command
            .args(&self.args)
            .arg(item.id.as_str())
            .arg(&scratch)
            .env(ENV_ITEM_ID, item.id.as_str());

        let output = run_with_stdin(command, artifact.0.clone())
            .await
            .map_err(|e| crate::Error::transformation(&item.id, e))?;

        if !output.status.success() {
            return Err(crate::Error::transformation(
                &item.id,
                format!("translator exited with {}: {}", output.status, stderr_tail(&output)),
            ));
        }

        take_scratch_output(&scratch).await.map_err(|e| {
            crate::Error::transformation(
                &item.id,
                format!("translated output {} unreadable: {e}", scratch.display()),
            )
        })
    }
}

/// Exporter that runs `<program> [args...] <source-dir> <destination-dir>` once
pub struct CliExporter {
    binary_path: PathBuf,
    args: Vec<String>,
}

impl CliExporter {
    /// Create an exporter with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            args: Vec::new(),
        }
    }

    /// Find `program` in PATH (or use it directly if it is a path)
    pub fn from_path(program: &str) -> Option<Self> {
        resolve_program(program).map(Self::new)
    }

    /// Extra arguments placed before the two directory arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl Exporter for CliExporter {
    async fn export(&self, source: &Path, destination: &Path) -> crate::Result<()> {
        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .arg(source)
            .arg(destination)
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("failed to execute exporter: {e}")))?;

        if !output.status.success() {
            return Err(crate::Error::ExternalTool(format!(
                "exporter exited with {}: {}",
                output.status,
                stderr_tail(&output)
            )));
        }
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InputFormat, ItemId, SummaryValue};
    use tempfile::TempDir;

    fn item(dir: &Path, id: &str) -> Item {
        Item {
            id: ItemId::from(id),
            source_path: dir.join(format!("{id}.mat")),
            format: InputFormat::Primary,
        }
    }

    fn context() -> RefineContext {
        RefineContext {
            data_dir: None,
            info_file: PathBuf::from("/tmp/info.txt"),
            resource_version: "Test".into(),
            solver: None,
        }
    }

    #[test]
    fn from_path_returns_none_for_nonexistent_binary() {
        assert!(
            CliRefiner::from_path("nonexistent-refiner-binary-xyz", PathBuf::from("/tmp")).is_none()
        );
        assert!(CliExporter::from_path("/definitely/not/here/exporter").is_none());
    }

    #[test]
    fn from_path_consistency_with_which_crate() {
        let which_result = which::which("sh");
        let from_path_result = CliTranslator::from_path("sh", PathBuf::from("/tmp"));
        assert_eq!(which_result.is_ok(), from_path_result.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn refiner_reads_summary_and_refined_output() {
        let dir = TempDir::new().unwrap();
        let script = r#"cat > "$2"; printf '{"id":"%s","version":"%s","reactions":3}' "$RECON_ITEM_ID" "$RECON_RESOURCE_VERSION""#;
        let refiner = CliRefiner::new(PathBuf::from("sh"), dir.path().to_path_buf())
            .with_args(vec!["-c".into(), script.into(), "refiner".into()]);

        let (refined, summary) = refiner
            .refine(&item(dir.path(), "m1"), RawArtifact(b"abc".to_vec()), &context())
            .await
            .unwrap();

        assert_eq!(refined.0, b"abc");
        assert_eq!(summary["id"], SummaryValue::Text("m1".into()));
        assert_eq!(summary["version"], SummaryValue::Text("Test".into()));
        assert_eq!(summary["reactions"], SummaryValue::Number(3.0));
        assert!(!dir.path().join("m1.refined").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn refiner_failure_is_transformation_error() {
        let dir = TempDir::new().unwrap();
        let refiner = CliRefiner::new(PathBuf::from("sh"), dir.path().to_path_buf()).with_args(
            vec!["-c".into(), "echo infeasible >&2; exit 3".into(), "refiner".into()],
        );

        let err = refiner
            .refine(&item(dir.path(), "m2"), RawArtifact::default(), &context())
            .await
            .unwrap_err();

        match err {
            crate::Error::Transformation { id, reason } => {
                assert_eq!(id, "m2");
                assert!(reason.contains("infeasible"), "got: {reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn refiner_rejects_non_json_stdout() {
        let dir = TempDir::new().unwrap();
        let refiner = CliRefiner::new(PathBuf::from("sh"), dir.path().to_path_buf()).with_args(
            vec!["-c".into(), r#"cat > "$2"; echo done"#.into(), "refiner".into()],
        );

        let err = refiner
            .refine(&item(dir.path(), "m3"), RawArtifact::default(), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Transformation { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn translator_writes_translated_output() {
        let dir = TempDir::new().unwrap();
        let translator = CliTranslator::new(PathBuf::from("sh"), dir.path().to_path_buf())
            .with_args(vec![
                "-c".into(),
                r#"tr a-z A-Z > "$2""#.into(),
                "translator".into(),
            ]);

        let translated = translator
            .translate(&item(dir.path(), "m4"), &RawArtifact(b"abc".to_vec()))
            .await
            .unwrap();
        assert_eq!(translated.0, b"ABC");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exporter_reports_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let exporter = CliExporter::new(PathBuf::from("sh"))
            .with_args(vec!["-c".into(), "exit 1".into(), "exporter".into()]);

        let err = exporter.export(dir.path(), dir.path()).await.unwrap_err();
        assert!(matches!(err, crate::Error::ExternalTool(_)));
    }
}
