//! Chunked parallel refinement
//!
//! The remaining items are partitioned into chunks. Each chunk's items run
//! concurrently on at most `workers` tasks, and the chunk's results are handed
//! back in item order only once every item in it has finished. Chunks never
//! overlap: the caller flushes one chunk before asking for the next.
//!
//! Workers never write to the output directories or the ledger. A failing
//! item aborts the remaining tasks of its chunk and the error is returned to
//! the caller.

use crate::collaborators::{ArtifactCodec, RefineContext, Refiner, Translator};
use crate::error::{Error, Result};
use crate::types::{Event, Item, SummaryRecord};
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Everything produced for one item, waiting to be flushed
#[derive(Debug, Clone)]
pub struct Refined<A> {
    /// The item that was processed
    pub item: Item,
    /// Refined artifact
    pub artifact: A,
    /// Translated artifact, for secondary-format items
    pub translated: Option<A>,
    /// Summary record returned by the refiner
    pub summary: SummaryRecord,
}

/// Split `items` into consecutive chunks of `size` (the last may be shorter)
///
/// Every item lands in exactly one chunk and order is preserved.
pub fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

/// Bounded worker pool, created once per run and reused for every chunk
pub struct WorkerPool<A: Send + Sync + 'static> {
    workers: usize,
    permits: Arc<Semaphore>,
    codec: Arc<dyn ArtifactCodec<A>>,
    refiner: Arc<dyn Refiner<A>>,
    translator: Option<Arc<dyn Translator<A>>>,
    context: Arc<RefineContext>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl<A: Send + Sync + 'static> WorkerPool<A> {
    /// Create a pool running at most `workers` items at a time
    pub fn new(
        workers: usize,
        codec: Arc<dyn ArtifactCodec<A>>,
        refiner: Arc<dyn Refiner<A>>,
        translator: Option<Arc<dyn Translator<A>>>,
        context: Arc<RefineContext>,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            codec,
            refiner,
            translator,
            context,
            event_tx: None,
        }
    }

    /// Emit an [`Event::ItemRefined`] on `tx` for every finished item
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Maximum concurrent items
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Refine every item of `chunk` and return the results in item order
    ///
    /// # Errors
    ///
    /// Returns the first item failure observed. Items still running are
    /// aborted and nothing from this chunk is returned.
    pub async fn run_chunk(&self, chunk: Vec<Item>) -> Result<Vec<Refined<A>>> {
        let size = chunk.len();
        let mut tasks = JoinSet::new();

        for (index, item) in chunk.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let codec = Arc::clone(&self.codec);
            let refiner = Arc::clone(&self.refiner);
            let translator = self.translator.clone();
            let context = Arc::clone(&self.context);
            let event_tx = self.event_tx.clone();

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        process_item(item, codec.as_ref(), refiner.as_ref(), translator, &context)
                            .await
                    }
                    Err(e) => Err(Error::Worker(format!("worker pool closed: {e}"))),
                };
                if let (Ok(refined), Some(tx)) = (&result, event_tx) {
                    tx.send(Event::ItemRefined {
                        id: refined.item.id.clone(),
                        translated: refined.translated.is_some(),
                    })
                    .ok();
                }
                (index, result)
            });
        }

        let mut slots: Vec<Option<Refined<A>>> = std::iter::repeat_with(|| None).take(size).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| Error::Worker(e.to_string()))?;
            match result {
                Ok(refined) => slots[index] = Some(refined),
                Err(e) => {
                    error!(error = %e, "Item failed, aborting chunk");
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Worker("a worker finished without a result".to_string()))
    }
}

/// Load, refine and (for secondary items) translate one item
async fn process_item<A: Send + Sync + 'static>(
    item: Item,
    codec: &dyn ArtifactCodec<A>,
    refiner: &dyn Refiner<A>,
    translator: Option<Arc<dyn Translator<A>>>,
    context: &RefineContext,
) -> Result<Refined<A>> {
    debug!(item_id = %item.id, refiner = refiner.name(), "Refining item");

    let artifact = codec
        .load(&item.source_path)
        .await
        .map_err(|e| Error::transformation(&item.id, format!("load failed: {e}")))?;

    let (artifact, summary) = refiner.refine(&item, artifact, context).await?;

    let translated = if item.format.needs_translation() {
        match translator {
            Some(translator) => Some(translator.translate(&item, &artifact).await?),
            None => {
                return Err(Error::transformation(
                    &item.id,
                    "secondary-format item but no translator configured",
                ));
            }
        }
    } else {
        None
    };

    Ok(Refined {
        item,
        artifact,
        translated,
        summary,
    })
}
