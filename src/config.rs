//! Configuration types for recon-batch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Input and output locations
///
/// Only `input_dir` is required. Output locations left unset are placed next to
/// the input directory (`refined/`, `translated/`, `summary/`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory scanned recursively for input artifacts
    pub input_dir: PathBuf,

    /// Refined artifacts, one file per item id
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Translated artifacts for secondary-format items
    #[serde(default)]
    pub translated_dir: Option<PathBuf>,

    /// Ledger snapshot and report tables
    #[serde(default)]
    pub summary_dir: Option<PathBuf>,

    /// Identifier-mapping file; generated from the input scan when absent
    #[serde(default)]
    pub info_file: Option<PathBuf>,

    /// Auxiliary data handed to the refiner untouched
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Destination of the optional export step
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
}

/// Chunk size policy for the worker pool
///
/// Large batches use `large` sized chunks, smaller ones `small` sized chunks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkPolicy {
    /// Chunk size when more than `threshold` items remain (default: 100)
    #[serde(default = "default_large_chunk")]
    pub large: usize,

    /// Chunk size otherwise (default: 25)
    #[serde(default = "default_small_chunk")]
    pub small: usize,

    /// Remaining item count above which `large` applies (default: 200)
    #[serde(default = "default_chunk_threshold")]
    pub threshold: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            large: default_large_chunk(),
            small: default_small_chunk(),
            threshold: default_chunk_threshold(),
        }
    }
}

impl ChunkPolicy {
    /// Chunk size for a run with `remaining` items left to process
    pub fn chunk_size(&self, remaining: usize) -> usize {
        if remaining > self.threshold {
            self.large
        } else {
            self.small
        }
    }
}

/// Worker pool and run behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Concurrent workers per chunk (default: 2)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Label of the resource being built; versions the ledger snapshot (default: "Reconstructions")
    #[serde(default = "default_resource_version")]
    pub resource_version: String,

    /// Reprocess items whose artifact already exists (default: false)
    #[serde(default)]
    pub overwrite: bool,

    /// Optional solver label passed to the refiner in its context
    #[serde(default)]
    pub solver: Option<String>,

    /// Chunk size policy
    #[serde(default)]
    pub chunking: ChunkPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resource_version: default_resource_version(),
            overwrite: false,
            solver: None,
            chunking: ChunkPolicy::default(),
        }
    }
}

/// Accepted input file extensions, compared case-insensitively
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormatsConfig {
    /// Extensions of primary-format inputs (default: ["mat"])
    #[serde(default = "default_primary_extensions")]
    pub primary_extensions: Vec<String>,

    /// Extensions of secondary-format inputs that need translation (default: ["sbml", "xml"])
    #[serde(default = "default_secondary_extensions")]
    pub secondary_extensions: Vec<String>,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            primary_extensions: default_primary_extensions(),
            secondary_extensions: default_secondary_extensions(),
        }
    }
}

/// Report and ledger presentation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Header of the generated identifier-mapping file (default: "MicrobeID")
    #[serde(default = "default_id_column_label")]
    pub id_column_label: String,

    /// Fields whose values are merged into one deduplicated list
    /// (default: ["untranslatedMets", "untranslatedRxns"])
    #[serde(default = "default_unmapped_fields")]
    pub unmapped_fields: Vec<String>,

    /// Prefix put in front of purely numeric ids in the ledger (default: "X")
    #[serde(default = "default_numeric_id_marker")]
    pub numeric_id_marker: String,

    /// Column delimiter of report tables (default: tab)
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// File extension of report tables (default: "txt")
    #[serde(default = "default_report_extension")]
    pub extension: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            id_column_label: default_id_column_label(),
            unmapped_fields: default_unmapped_fields(),
            numeric_id_marker: default_numeric_id_marker(),
            delimiter: default_delimiter(),
            extension: default_report_extension(),
        }
    }
}

/// Main configuration for a batch run
///
/// Sections map one-to-one onto TOML tables:
///
/// ```toml
/// [paths]
/// input_dir = "/data/drafts"
///
/// [execution]
/// workers = 8
/// resource_version = "AGORA2"
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input and output locations
    pub paths: PathsConfig,

    /// Worker pool and run behaviour
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Accepted input formats
    #[serde(default)]
    pub formats: FormatsConfig,

    /// Report and ledger presentation
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Configuration with defaults for everything except the input directory
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                input_dir: input_dir.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Load a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config("config", format!("cannot read {}: {e}", path.display())))?;
        Ok(toml::from_str(&text)?)
    }

    /// Reject settings the driver cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.paths.input_dir.as_os_str().is_empty() {
            return Err(Error::config("input_dir", "input directory is required"));
        }
        if self.execution.workers == 0 {
            return Err(Error::config("workers", "must be at least 1"));
        }
        if self.execution.chunking.large == 0 || self.execution.chunking.small == 0 {
            return Err(Error::config("chunking", "chunk sizes must be at least 1"));
        }
        if self.execution.resource_version.trim().is_empty() {
            return Err(Error::config("resource_version", "must not be empty"));
        }
        if self.report.numeric_id_marker.is_empty()
            || self
                .report
                .numeric_id_marker
                .bytes()
                .all(|b| b.is_ascii_digit())
        {
            return Err(Error::config(
                "numeric_id_marker",
                "must contain a non-digit character",
            ));
        }
        if !self.report.delimiter.is_ascii() || matches!(self.report.delimiter, '\n' | '\r' | '"') {
            return Err(Error::config(
                "delimiter",
                "must be a single ASCII character other than a quote or line break",
            ));
        }
        let overlap = self.formats.primary_extensions.iter().find(|p| {
            self.formats
                .secondary_extensions
                .iter()
                .any(|s| s.eq_ignore_ascii_case(p))
        });
        if let Some(ext) = overlap {
            return Err(Error::config(
                "formats",
                format!("extension '{ext}' is listed as both primary and secondary"),
            ));
        }
        Ok(())
    }

    fn sibling_of_input(&self, name: &str) -> PathBuf {
        self.paths
            .input_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(name)
    }

    /// Directory for refined artifacts
    pub fn output_dir(&self) -> PathBuf {
        self.paths
            .output_dir
            .clone()
            .unwrap_or_else(|| self.sibling_of_input("refined"))
    }

    /// Directory for translated artifacts
    pub fn translated_dir(&self) -> PathBuf {
        self.paths
            .translated_dir
            .clone()
            .unwrap_or_else(|| self.sibling_of_input("translated"))
    }

    /// Directory for the ledger snapshot and the report tables
    pub fn summary_dir(&self) -> PathBuf {
        self.paths
            .summary_dir
            .clone()
            .unwrap_or_else(|| self.sibling_of_input("summary"))
    }

    /// Identifier-mapping file, supplied or generated
    pub fn info_file(&self) -> PathBuf {
        self.paths.info_file.clone().unwrap_or_else(|| {
            self.summary_dir()
                .join(format!("{}_info.txt", self.execution.resource_version))
        })
    }

    /// Report delimiter as a byte, for the csv writer
    pub fn delimiter_byte(&self) -> Result<u8> {
        u8::try_from(self.report.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| Error::config("delimiter", "must be an ASCII character"))
    }

    /// Ledger snapshot file, versioned by the resource label
    pub fn ledger_path(&self) -> PathBuf {
        self.summary_dir()
            .join(format!("summary_{}.json", self.execution.resource_version))
    }
}

fn default_workers() -> usize {
    2
}

fn default_resource_version() -> String {
    "Reconstructions".to_string()
}

fn default_large_chunk() -> usize {
    100
}

fn default_small_chunk() -> usize {
    25
}

fn default_chunk_threshold() -> usize {
    200
}

fn default_primary_extensions() -> Vec<String> {
    vec!["mat".to_string()]
}

fn default_secondary_extensions() -> Vec<String> {
    vec!["sbml".to_string(), "xml".to_string()]
}

fn default_id_column_label() -> String {
    "MicrobeID".to_string()
}

fn default_unmapped_fields() -> Vec<String> {
    vec!["untranslatedMets".to_string(), "untranslatedRxns".to_string()]
}

fn default_numeric_id_marker() -> String {
    "X".to_string()
}

fn default_delimiter() -> char {
    '\t'
}

fn default_report_extension() -> String {
    "txt".to_string()
}
