//! Core types for recon-batch

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Canonical identifier of an input item
///
/// Derived from the source file name by a [`Canonicalizer`](crate::collaborators::Canonicalizer).
/// Unique within a run after deduplication.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create a new ItemId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id consists only of ASCII digits
    ///
    /// Such ids are easily mistaken for numbers by spreadsheet and table tools.
    pub fn is_numeric(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ItemId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ItemId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source format of an input item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Already in the target representation; refined only
    Primary,
    /// Needs an additional translation step after refinement
    Secondary,
}

impl InputFormat {
    /// Whether items of this format get a translated artifact
    pub fn needs_translation(&self) -> bool {
        matches!(self, InputFormat::Secondary)
    }
}

/// One input artifact reference with its canonical identifier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Canonical id derived from the file name
    pub id: ItemId,
    /// Location of the source artifact
    pub source_path: PathBuf,
    /// Source format, decided by file extension
    pub format: InputFormat,
}

/// A single value in a summary record
///
/// Records are heterogeneous: the same field may hold a number for one item
/// and a list for another, so every consumer must handle all three variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SummaryValue {
    /// Scalar number
    Number(f64),
    /// Single string
    Text(String),
    /// Ordered list of strings
    List(Vec<String>),
}

impl SummaryValue {
    /// Whether this value contributes nothing to a report row
    pub fn is_empty(&self) -> bool {
        match self {
            SummaryValue::Number(_) => false,
            SummaryValue::Text(s) => s.is_empty(),
            SummaryValue::List(values) => values.is_empty(),
        }
    }

    /// Render the value as report cells, one per column
    pub fn cells(&self) -> Vec<String> {
        match self {
            SummaryValue::Number(n) => vec![n.to_string()],
            SummaryValue::Text(s) => vec![s.clone()],
            SummaryValue::List(values) => values.clone(),
        }
    }
}

impl From<f64> for SummaryValue {
    fn from(n: f64) -> Self {
        SummaryValue::Number(n)
    }
}

impl From<&str> for SummaryValue {
    fn from(s: &str) -> Self {
        SummaryValue::Text(s.to_string())
    }
}

impl From<String> for SummaryValue {
    fn from(s: String) -> Self {
        SummaryValue::Text(s)
    }
}

impl From<Vec<String>> for SummaryValue {
    fn from(values: Vec<String>) -> Self {
        SummaryValue::List(values)
    }
}

impl From<Vec<&str>> for SummaryValue {
    fn from(values: Vec<&str>) -> Self {
        SummaryValue::List(values.into_iter().map(str::to_string).collect())
    }
}

/// Per-item summary produced by the refiner, keyed by field name
pub type SummaryRecord = BTreeMap<String, SummaryValue>;

/// Event emitted during a batch run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Input scan finished
    Discovered {
        /// Unique items found
        items: usize,
        /// Later items dropped because their id was already taken
        duplicates_dropped: usize,
    },

    /// Previously completed work was found and will be skipped
    Resumed {
        /// Items with an artifact already in the output directory
        already_done: usize,
        /// Items left to process
        remaining: usize,
    },

    /// A chunk was handed to the worker pool
    ChunkStarted {
        /// Zero-based chunk index
        chunk: usize,
        /// Total chunks in this run
        total_chunks: usize,
        /// Items in this chunk
        size: usize,
    },

    /// A worker finished refining one item
    ItemRefined {
        /// Canonical id of the item
        id: ItemId,
        /// Whether a translated artifact was produced too
        translated: bool,
    },

    /// A chunk's artifacts and the ledger snapshot were persisted
    ChunkFlushed {
        /// Zero-based chunk index
        chunk: usize,
        /// Entries in the ledger after this flush
        ledger_entries: usize,
    },

    /// One report table was written
    ReportWritten {
        /// Summary field name
        field: String,
        /// Destination file
        path: PathBuf,
    },

    /// One report table failed to write
    ReportFailed {
        /// Summary field name
        field: String,
        /// Failure message
        error: String,
    },

    /// The export step finished
    Exported {
        /// Destination directory
        destination: PathBuf,
    },

    /// The run stopped at a chunk boundary on request
    Stopped {
        /// Chunks flushed before stopping
        chunks_completed: usize,
    },

    /// The run finished and the report was produced
    Completed {
        /// Items refined during this run
        processed: usize,
    },
}

/// Outcome of a batch run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique items found in the input directory
    pub discovered: usize,

    /// Items dropped because their canonical id collided with an earlier one
    pub duplicates_dropped: usize,

    /// Items skipped because their artifact already existed
    pub already_done: usize,

    /// Items refined and persisted during this run
    pub processed: usize,

    /// Chunks flushed during this run
    pub chunks: usize,

    /// Entries in the ledger at the end of the run
    pub ledger_entries: usize,

    /// Report files written
    pub report_files: Vec<PathBuf>,

    /// Fields whose report file could not be written, with the failure message
    pub report_failures: Vec<(String, String)>,

    /// True when the run stopped early at a chunk boundary
    pub stopped: bool,
}
