//! Batch run orchestration
//!
//! A run moves through fixed phases:
//! 1. resolve the input directory into a deduplicated item list
//! 2. prepare output directories, the identifier-mapping file and the ledger
//! 3. drop items whose artifact already exists (unless overwriting)
//! 4. refine the remaining items chunk by chunk, flushing each chunk before the next
//! 5. aggregate the ledger into report tables and write them
//! 6. optionally export the refined artifacts
//!
//! Only step 4 is checkpointed. Steps 5 and 6 are recomputed in full every run.

use crate::aggregate::SummaryAggregator;
use crate::collaborators::{
    ArtifactCodec, Canonicalizer, Exporter, RefineContext, Refiner, Translator,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::flusher::ChunkFlusher;
use crate::ledger::SummaryLedger;
use crate::pool::{WorkerPool, partition};
use crate::progress::ProgressStore;
use crate::report::ReportWriter;
use crate::resolver::{ItemResolver, write_info_file};
use crate::types::{Event, InputFormat, RunReport};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Capacity of the event channel; slow subscribers miss older events
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The delegated pieces of a run
pub struct Collaborators<A: Send + Sync + 'static> {
    /// Loads inputs and stores refined/translated artifacts
    pub codec: Arc<dyn ArtifactCodec<A>>,
    /// Per-item transformation
    pub refiner: Arc<dyn Refiner<A>>,
    /// Required as soon as any secondary-format input is found
    pub translator: Option<Arc<dyn Translator<A>>>,
    /// Runs after the report when an export directory is configured
    pub exporter: Option<Arc<dyn Exporter>>,
    /// File name to item id
    pub canonicalizer: Arc<dyn Canonicalizer>,
}

impl<A: Send + Sync + 'static> Clone for Collaborators<A> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
            refiner: Arc::clone(&self.refiner),
            translator: self.translator.clone(),
            exporter: self.exporter.clone(),
            canonicalizer: Arc::clone(&self.canonicalizer),
        }
    }
}

/// Fault-tolerant batch driver (cloneable, all fields are shared)
pub struct BatchDriver<A: Send + Sync + 'static> {
    config: Arc<Config>,
    collaborators: Collaborators<A>,
    event_tx: broadcast::Sender<Event>,
    stop: CancellationToken,
}

impl<A: Send + Sync + 'static> Clone for BatchDriver<A> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            collaborators: self.collaborators.clone(),
            event_tx: self.event_tx.clone(),
            stop: self.stop.clone(),
        }
    }
}

impl<A: Send + Sync + 'static> BatchDriver<A> {
    /// Create a driver after validating `config`
    pub fn new(config: Config, collaborators: Collaborators<A>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            collaborators,
            event_tx,
            stop: CancellationToken::new(),
        })
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration this driver runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ask a running batch to stop at the next chunk boundary
    ///
    /// The chunk in flight still completes and is flushed.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Token that stops the run when cancelled
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Use an externally owned stop token
    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Run the batch to completion (or to a requested stop)
    ///
    /// # Errors
    ///
    /// Any discovery, transformation or persist failure aborts the run.
    /// Chunks flushed before the failure stay valid and are skipped next time.
    /// Report write failures do not abort; they are listed in the returned
    /// [`RunReport`].
    pub async fn run(&self) -> Result<RunReport> {
        let result = self.run_phases().await;
        if let Err(e) = &result {
            error!(code = e.code(), error = %e, "Batch run aborted");
        }
        result
    }

    async fn run_phases(&self) -> Result<RunReport> {
        let config = &self.config;
        let collab = &self.collaborators;
        let mut report = RunReport::default();

        // 1. Discovery
        let input_dir = &config.paths.input_dir;
        let resolver = ItemResolver::new(Arc::clone(&collab.canonicalizer), config.formats.clone());
        let resolution = resolver.resolve(input_dir)?;
        report.discovered = resolution.items.len();
        report.duplicates_dropped = resolution.duplicates_dropped;
        self.emit(Event::Discovered {
            items: resolution.items.len(),
            duplicates_dropped: resolution.duplicates_dropped,
        });

        let needs_translator = resolution
            .items
            .iter()
            .any(|item| item.format == InputFormat::Secondary);
        if needs_translator && collab.translator.is_none() {
            return Err(Error::config(
                "translator",
                "secondary-format inputs found but no translator is configured",
            ));
        }

        // 2. Output layout, identifier mapping, ledger
        let output_dir = config.output_dir();
        let translated_dir = config.translated_dir();
        let summary_dir = config.summary_dir();
        for dir in [&output_dir, &translated_dir, &summary_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::discovery(dir, e))?;
        }

        let info_file = config.info_file();
        if !info_file.exists() {
            write_info_file(&info_file, &config.report.id_column_label, resolution.ids())?;
            info!(path = %info_file.display(), "Generated identifier-mapping file");
        }

        let progress = ProgressStore::new(&output_dir, collab.codec.extension());
        let mut ledger = SummaryLedger::open(config.ledger_path(), &config.execution.resource_version).await?;
        let done = progress.completed_ids().await?;
        let stale = ledger.retain(|entry| done.contains(&entry.id));
        if stale > 0 {
            warn!(stale, "Dropped ledger entries whose artifact is missing");
            ledger.save().await?;
        }

        // 3. Resume
        let pending = progress.split_pending(resolution.items, &done, config.execution.overwrite);
        report.already_done = pending.already_done;
        self.emit(Event::Resumed {
            already_done: pending.already_done,
            remaining: pending.items.len(),
        });

        let unrecorded = done.iter().filter(|id| !ledger.contains(id)).count();
        if unrecorded > 0 {
            warn!(
                unrecorded,
                "Artifacts exist without a ledger entry; they are skipped and absent from the report"
            );
        }

        // 4. Chunked refinement
        let chunk_size = config.execution.chunking.chunk_size(pending.items.len());
        let chunks = partition(pending.items, chunk_size);
        let total_chunks = chunks.len();
        info!(
            remaining = chunks.iter().map(Vec::len).sum::<usize>(),
            chunk_size,
            total_chunks,
            workers = config.execution.workers,
            "Starting refinement"
        );

        let context = Arc::new(RefineContext::from_config(config));
        let pool = WorkerPool::new(
            config.execution.workers,
            Arc::clone(&collab.codec),
            Arc::clone(&collab.refiner),
            collab.translator.clone(),
            context,
        )
        .with_events(self.event_tx.clone());
        let flusher = ChunkFlusher::new(
            Arc::clone(&collab.codec),
            &output_dir,
            &translated_dir,
            config.report.numeric_id_marker.clone(),
        );

        for (index, chunk) in chunks.into_iter().enumerate() {
            if self.stop.is_cancelled() {
                info!(chunks_completed = report.chunks, "Stop requested, leaving remaining chunks");
                self.emit(Event::Stopped {
                    chunks_completed: report.chunks,
                });
                report.stopped = true;
                report.ledger_entries = ledger.len();
                return Ok(report);
            }

            self.emit(Event::ChunkStarted {
                chunk: index,
                total_chunks,
                size: chunk.len(),
            });
            info!(chunk = index + 1, total_chunks, size = chunk.len(), "Processing chunk");

            let refined = pool.run_chunk(chunk).await?;
            report.processed += flusher.flush(refined, &mut ledger).await?;
            report.chunks += 1;

            self.emit(Event::ChunkFlushed {
                chunk: index,
                ledger_entries: ledger.len(),
            });
        }
        report.ledger_entries = ledger.len();

        // 5. Report
        let tables = SummaryAggregator::new(config.report.unmapped_fields.clone())
            .aggregate(ledger.entries());
        let writer = ReportWriter::new(&summary_dir, config.delimiter_byte()?, &config.report.extension)
            .with_reserved([info_file.clone(), config.ledger_path()]);
        let outcome = writer.write_all(&tables);
        for (field, path) in outcome.written {
            self.emit(Event::ReportWritten {
                field,
                path: path.clone(),
            });
            report.report_files.push(path);
        }
        for failure in outcome.failures {
            let (field, reason) = match failure {
                Error::ReportWrite { field, reason } => (field, reason),
                other => (String::new(), other.to_string()),
            };
            self.emit(Event::ReportFailed {
                field: field.clone(),
                error: reason.clone(),
            });
            report.report_failures.push((field, reason));
        }
        info!(
            tables = report.report_files.len(),
            failures = report.report_failures.len(),
            "Report written"
        );

        // 6. Export
        if let Some(export_dir) = &config.paths.export_dir {
            self.export(&output_dir, export_dir).await?;
        }

        self.emit(Event::Completed {
            processed: report.processed,
        });
        info!(
            processed = report.processed,
            already_done = report.already_done,
            ledger_entries = report.ledger_entries,
            "Batch run complete"
        );
        Ok(report)
    }

    async fn export(&self, source: &Path, destination: &Path) -> Result<()> {
        let Some(exporter) = &self.collaborators.exporter else {
            warn!(destination = %destination.display(), "Export directory set but no exporter configured");
            return Ok(());
        };
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| Error::persist(destination, e))?;
        exporter.export(source, destination).await?;
        info!(destination = %destination.display(), "Export complete");
        self.emit(Event::Exported {
            destination: destination.to_path_buf(),
        });
        Ok(())
    }
}
