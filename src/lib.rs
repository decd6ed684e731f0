//! # recon-batch
//!
//! Resumable, chunked batch driver for refining large collections of
//! reconstructions.
//!
//! A run scans an input directory, skips every item whose refined artifact
//! already exists, refines the rest on a bounded worker pool in sequential
//! chunks, and checkpoints after each chunk. Per-item summaries are kept in a
//! ledger and pivoted into one delimited report file per summary field.
//!
//! The refinement itself is delegated: plug in an [`collaborators::ArtifactCodec`],
//! a [`collaborators::Refiner`] and, for secondary-format inputs, a
//! [`collaborators::Translator`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use recon_batch::collaborators::{CliRefiner, DefaultCanonicalizer, RawCodec};
//! use recon_batch::{BatchDriver, Collaborators, Config};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("/data/Reconstructions/mat");
//!     let refiner = CliRefiner::from_path("refine-recon", "/tmp/scratch".into())
//!         .ok_or("refiner binary not found")?;
//!
//!     let driver = BatchDriver::new(
//!         config,
//!         Collaborators {
//!             codec: Arc::new(RawCodec::new("mat")),
//!             refiner: Arc::new(refiner),
//!             translator: None,
//!             exporter: None,
//!             canonicalizer: Arc::new(DefaultCanonicalizer),
//!         },
//!     )?;
//!
//!     let mut events = driver.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = driver.run().await?;
//!     println!("refined {} items", report.processed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Per-field report tables built from the ledger
pub mod aggregate;
/// Pluggable codec, refiner, translator, exporter and id canonicalizer
pub mod collaborators;
/// Configuration types
pub mod config;
/// Run orchestration
pub mod driver;
/// Error types
pub mod error;
/// Chunk persistence
pub mod flusher;
/// Summary ledger with snapshot checkpoints
pub mod ledger;
/// Bounded worker pool for one chunk
pub mod pool;
/// Completed-work detection
pub mod progress;
/// Delimited report writer
pub mod report;
/// Input discovery and deduplication
pub mod resolver;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use driver::{BatchDriver, Collaborators};
pub use error::{Error, Result};
pub use types::{Event, InputFormat, Item, ItemId, RunReport, SummaryRecord, SummaryValue};

/// Run a batch, stopping at the next chunk boundary on a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A second signal is not handled specially; the chunk in flight is always
/// allowed to finish and flush.
pub async fn run_with_shutdown<A: Send + Sync + 'static>(driver: BatchDriver<A>) -> Result<RunReport> {
    let stop = driver.stop_token();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_signal() => {
                tracing::info!(signal, "Stop requested, finishing the chunk in flight");
                stop.cancel();
            }
            _ = stop.cancelled() => {}
        }
    });

    let result = driver.run().await;
    watcher.abort();
    result
}

/// Wait for the first termination signal and return its name
#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in sandboxes; fall back to whatever is available
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut term), Ok(mut int)) => tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
        },
        (Ok(mut term), Err(e)) => {
            tracing::warn!(error = %e, "SIGINT unavailable, the run stops only on SIGTERM");
            term.recv().await;
            "SIGTERM"
        }
        (Err(e), Ok(mut int)) => {
            tracing::warn!(error = %e, "SIGTERM unavailable, the run stops only on SIGINT");
            int.recv().await;
            "SIGINT"
        }
        (Err(term_err), Err(int_err)) => {
            tracing::warn!(
                sigterm_error = %term_err,
                sigint_error = %int_err,
                "No signal handlers registered, listening for Ctrl+C only"
            );
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for Ctrl+C, stop requests will be ignored");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
