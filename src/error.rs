//! Error types for recon-batch
//!
//! This module provides the crate-wide error type. Each variant maps onto one of
//! the failure classes of a batch run:
//! - Discovery failures abort before any work starts
//! - Transformation failures abort the current chunk and the run
//! - Persist failures abort the chunk being flushed
//! - Report write failures are collected per field and never abort the run

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for recon-batch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for recon-batch
///
/// Each variant includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Input or output directory is missing or unreadable
    #[error("discovery failed for {path}: {reason}")]
    Discovery {
        /// The directory that could not be scanned
        path: PathBuf,
        /// Why the scan failed
        reason: String,
    },

    /// The external per-item transformation failed
    #[error("transformation failed for item {id}: {reason}")]
    Transformation {
        /// Canonical id of the item being refined
        id: String,
        /// Failure reported by the transformation
        reason: String,
    },

    /// An artifact or the ledger snapshot could not be written
    #[error("failed to persist {path}: {reason}")]
    Persist {
        /// Destination that could not be written
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// A single report table could not be written
    #[error("failed to write report for field {field}: {reason}")]
    ReportWrite {
        /// Summary field whose table failed to write
        field: String,
        /// Underlying failure
        reason: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "workers")
        key: Option<String>,
    },

    /// External tool execution failed (refiner, translator, exporter)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// A worker task panicked or was aborted before returning
    #[error("worker task failed: {0}")]
    Worker(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a [`Error::Discovery`] from any displayable cause
    pub fn discovery(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Discovery {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`Error::Persist`] from any displayable cause
    pub fn persist(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Persist {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`Error::Transformation`] from any displayable cause
    pub fn transformation(id: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Error::Transformation {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`Error::Config`] tied to a configuration key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Machine-readable error code, used in events and log fields
    pub fn code(&self) -> &'static str {
        match self {
            Error::Discovery { .. } => "discovery_error",
            Error::Transformation { .. } => "transformation_error",
            Error::Persist { .. } => "persist_error",
            Error::ReportWrite { .. } => "report_write_error",
            Error::Config { .. } | Error::Toml(_) => "config_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Worker(_) => "worker_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}
