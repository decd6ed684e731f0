//! Contracts for the work recon-batch delegates
//!
//! The driver never interprets artifacts. Loading, refining, translating and
//! exporting them is done by implementations of the traits in this module:
//!
//! - [`ArtifactCodec`]: reads and writes artifacts
//! - [`Refiner`]: the expensive per-item transformation
//! - [`Translator`]: extra conversion for secondary-format items
//! - [`Exporter`]: optional final export of the whole output directory
//! - [`Canonicalizer`]: derives an item id from a file name
//!
//! Built-in implementations treat artifacts as raw bytes and run external
//! programs, which is what the `recon-batch` binary uses:
//!
//! ```no_run
//! use recon_batch::collaborators::{CliRefiner, RawCodec};
//! use std::path::PathBuf;
//!
//! let codec = RawCodec::new("mat");
//! let refiner = CliRefiner::from_path("refine-model", PathBuf::from("/tmp/scratch"))
//!     .expect("refine-model not found in PATH");
//! ```

mod canonical;
mod cli;
mod raw;
mod traits;

pub use canonical::DefaultCanonicalizer;
pub use cli::{CliExporter, CliRefiner, CliTranslator};
pub use raw::{RawArtifact, RawCodec};
pub use traits::{ArtifactCodec, Canonicalizer, Exporter, RefineContext, Refiner, Translator};
