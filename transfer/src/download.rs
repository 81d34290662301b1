use std::sync::Arc;
use std::sync::atomic::Ordering;

use block_client::{BlockFetcher, BlockInfo, BlockPage, BlockPagination, BlockSource, ByteStream, TransferMeta};
use bytes::Bytes;
use drive_config::DownloadConfig;
use futures::{StreamExt, TryStreamExt};
use more_asserts::debug_assert_ge;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::ControlState;
use crate::errors::{Result, TransferError};
use crate::events::{EventSender, TransferEvent, event_channel};
use crate::model::{TransferId, TransferRecord, TransferState};
use crate::progress::ProgressTracker;
use crate::reorder_buffer::ReorderBuffer;
use crate::sink::Sink;
use crate::transform::ContentTransform;

/// Delivers one transfer's content to an output sink as a contiguous,
/// strictly block-ordered byte stream, fetching the underlying blocks with
/// bounded concurrency and tolerating pause/resume/cancel and retry.
///
/// Cheap to clone; clones share the same transfer (so one task can drive
/// `start()` while another calls `pause()`/`cancel()`).
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<DownloadInner>,
}

struct DownloadInner {
    record: TransferRecord,
    config: DownloadConfig,
    source: Arc<dyn BlockSource>,
    fetcher: Arc<dyn BlockFetcher>,
    transform: Option<Arc<dyn ContentTransform>>,
    events: EventSender,
    progress: Arc<ProgressTracker>,
    buffer: Arc<ReorderBuffer>,
    capacity: Arc<Semaphore>,
    sink: AsyncMutex<Option<Box<dyn Sink>>>,
    control: ControlState,
}

/// State shared by the fetch workers of one transfer.
struct WorkerCtx {
    fetcher: Arc<dyn BlockFetcher>,
    transform: Option<Arc<dyn ContentTransform>>,
    buffer: Arc<ReorderBuffer>,
    progress: Arc<ProgressTracker>,
    capacity: Arc<Semaphore>,
    sink: AsyncMutex<Box<dyn Sink>>,
}

impl DownloadEngine {
    /// Creates the engine and the receiving half of its event channel. The
    /// sink is opened when `start()` gets the first descriptor page; the
    /// consumer may begin reading as soon as `Started` is observed.
    pub fn new(
        meta: TransferMeta,
        source: Arc<dyn BlockSource>,
        fetcher: Arc<dyn BlockFetcher>,
        transform: Option<Arc<dyn ContentTransform>>,
        sink: Box<dyn Sink>,
        config: DownloadConfig,
    ) -> (Self, UnboundedReceiver<TransferEvent>) {
        let (events, rx) = event_channel();
        let progress = Arc::new(ProgressTracker::new(events.clone()));

        // The buffer must admit at least one full batch of concurrent
        // fetches, otherwise far-ahead blocks could hold every slot while
        // the active block waits for one.
        let capacity = config.max_buffered_blocks.max(config.max_concurrent_fetches).max(1);

        let engine = Self {
            inner: Arc::new(DownloadInner {
                record: TransferRecord::new(meta),
                source,
                fetcher,
                transform,
                events,
                progress,
                buffer: Arc::new(ReorderBuffer::new(1)),
                capacity: Arc::new(Semaphore::new(capacity)),
                sink: AsyncMutex::new(Some(sink)),
                control: ControlState::new(),
                config,
            }),
        };

        (engine, rx)
    }

    pub fn id(&self) -> &TransferId {
        &self.inner.record.id
    }

    pub fn meta(&self) -> &TransferMeta {
        &self.inner.record.meta
    }

    pub fn state(&self) -> TransferState {
        self.inner.record.state()
    }

    pub fn started_at(&self) -> std::time::SystemTime {
        self.inner.record.started_at
    }

    pub fn last_error(&self) -> Option<TransferError> {
        self.inner.record.last_error()
    }

    /// Net observed bytes (receipts minus reverts).
    pub fn cumulative_progress(&self) -> u64 {
        self.inner.progress.cumulative_bytes()
    }

    /// Runs the transfer to completion. Fails with a cancellation error if
    /// the transfer was canceled before starting; can only be called once.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.record.set_state(TransferState::Initializing);

        let mut sink = inner
            .sink
            .lock()
            .await
            .take()
            .ok_or_else(|| TransferError::Internal("transfer already started".to_string()))?;

        if inner.control.cancel_root.is_cancelled() {
            let err = TransferError::Cancelled;
            let _ = sink.abort(&err).await;
            inner.record.set_state(TransferState::Canceled);
            inner.events.send(TransferEvent::Failed { error: err.clone() });
            return Err(err);
        }

        let ctx = Arc::new(WorkerCtx {
            fetcher: inner.fetcher.clone(),
            transform: inner.transform.clone(),
            buffer: inner.buffer.clone(),
            progress: inner.progress.clone(),
            capacity: inner.capacity.clone(),
            sink: AsyncMutex::new(sink),
        });

        let result = match self.run(&ctx).await {
            Ok(()) => {
                inner.record.set_state(TransferState::Finalizing);
                ctx.sink.lock().await.close().await
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                inner.record.set_state(TransferState::Done);
                inner.events.send(TransferEvent::Finished);
                info!(id = %inner.record.id, bytes = inner.progress.cumulative_bytes(), "Download finished");
                Ok(())
            },
            Err(err) => {
                let _ = ctx.sink.lock().await.abort(&err).await;
                if err.is_cancellation() {
                    inner.record.set_state(TransferState::Canceled);
                } else {
                    inner.record.set_error(err.clone());
                }
                inner.events.send(TransferEvent::Failed { error: err.clone() });
                Err(err)
            },
        }
    }

    /// Suspends the transfer: aborts the in-flight fetches and returns only
    /// after every buffered-but-unflushed byte has been reverted, so a
    /// subsequent resume cannot double-flush a stale buffer.
    pub async fn pause(&self) {
        let inner = &self.inner;
        inner.control.paused.store(true, Ordering::Release);
        inner.control.cancel_fetch();
        inner.record.enter_paused();
        inner.progress.wait_drained().await;
        debug!(id = %inner.record.id, "Paused; unflushed progress reverted");
    }

    /// Clears the paused flag and installs a fresh cancellation token. Does
    /// not itself restart fetching: the driver blocked on the pause is the
    /// one that replays from the last flushed boundary.
    pub fn resume(&self) {
        let inner = &self.inner;
        inner.control.refresh_token();
        inner.control.paused.store(false, Ordering::Release);
        inner.record.leave_paused();
        inner.control.resume_notify.notify_waiters();
    }

    /// Aborts the transfer. Idempotent.
    pub fn cancel(&self) {
        let inner = &self.inner;
        if inner.control.cancel_root.is_cancelled() {
            return;
        }
        inner.control.cancel_root.cancel();
        inner.control.cancel_fetch();
        inner.control.resume_notify.notify_waiters();
    }

    async fn run(&self, ctx: &Arc<WorkerCtx>) -> Result<()> {
        let inner = &self.inner;
        let page_size = inner.config.block_page_size.max(1);

        let mut started = false;
        let mut expired_retries = 0usize;
        // Pagination cursor. Every retry path resets it to the active
        // index, which re-fetches all remaining pages rather than resuming
        // mid-page; correct, if occasionally more than strictly needed.
        let mut cursor = inner.buffer.active_index();

        loop {
            self.wait_if_paused().await?;
            let token = inner.control.current_token();

            let pagination = BlockPagination::starting_at(cursor, page_size);
            let page = match inner.source.get_blocks(pagination, &token).await {
                Ok(p) => p,
                Err(e) => {
                    self.recover_or_bail(e.into(), &mut expired_retries).await?;
                    cursor = inner.buffer.active_index();
                    continue;
                },
            };

            let (raw_page_len, max_index, queue) = match page {
                BlockPage::Preloaded(bytes) => {
                    if started {
                        return Err(TransferError::Internal(
                            "source switched to preloaded content mid-transfer".to_string(),
                        ));
                    }
                    return self.write_preloaded(ctx, bytes).await;
                },
                BlockPage::Paged(blocks) => {
                    let raw_len = blocks.len();
                    let max_index = blocks.iter().map(|b| b.index).max().unwrap_or(cursor);
                    let active = inner.buffer.active_index();
                    let mut queue: Vec<BlockInfo> = blocks.into_iter().filter(|b| b.index >= active).collect();
                    queue.sort_by_key(|b| b.index);
                    (raw_len, max_index, queue)
                },
            };

            if !started {
                started = true;
                inner.record.set_state(TransferState::Progress);
                inner.events.send(TransferEvent::Started);
            }

            debug!(
                id = %inner.record.id,
                cursor,
                page_len = raw_page_len,
                queued = queue.len(),
                "Running block page"
            );

            match self.run_worker_pool(ctx, queue, &token).await {
                Ok(()) => {
                    debug_assert_eq!(inner.buffer.buffered_blocks(), 0);
                    if raw_page_len == page_size {
                        debug_assert_ge!(max_index + 1, cursor);
                        cursor = max_index + 1;
                        continue;
                    }
                    // A short page is the termination signal.
                    return Ok(());
                },
                Err(err) => {
                    self.recover_or_bail(err, &mut expired_retries).await?;
                    cursor = inner.buffer.active_index();
                },
            }
        }
    }

    /// The preloaded fast path: no block fetches, one progress signal (even
    /// for zero-size content), write, and out. The caller closes the sink.
    async fn write_preloaded(&self, ctx: &Arc<WorkerCtx>, bytes: Bytes) -> Result<()> {
        let inner = &self.inner;
        info!(id = %inner.record.id, len = bytes.len(), "Writing preloaded content");

        inner.record.set_state(TransferState::Progress);
        inner.events.send(TransferEvent::Started);

        if bytes.is_empty() {
            inner.events.send(TransferEvent::Progress { delta: 0 });
        } else {
            inner.progress.record(0, bytes.len() as u64);
            inner.progress.settle(0);
            ctx.sink.lock().await.write(bytes).await?;
        }
        Ok(())
    }

    /// Runs one page's block queue through the bounded worker pool. On the
    /// first worker failure the remaining workers are aborted; the pool
    /// still drains completely before this returns, which is what makes the
    /// later revert race-free.
    async fn run_worker_pool(
        &self,
        ctx: &Arc<WorkerCtx>,
        queue: Vec<BlockInfo>,
        token: &CancellationToken,
    ) -> Result<()> {
        if queue.is_empty() {
            return Ok(());
        }

        let workers = Arc::new(Semaphore::new(self.inner.config.max_concurrent_fetches.max(1)));
        let mut pool: JoinSet<Result<()>> = JoinSet::new();

        for block in queue {
            let ctx = ctx.clone();
            let token = token.clone();
            let workers = workers.clone();
            pool.spawn(async move {
                let _slot = tokio::select! {
                    _ = token.cancelled() => return Err(TransferError::Cancelled),
                    permit = workers.acquire_owned() => permit?,
                };
                fetch_and_flush(ctx, block, token).await
            });
        }

        let mut first_error: Option<TransferError> = None;
        while let Some(joined) = pool.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(e.into()));
            if let Err(e) = result {
                if first_error.is_none() {
                    token.cancel();
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Classifies a round failure. Returns `Ok(())` when the round should
    /// be replayed from the active index and `Err` when the transfer is
    /// over. The worker pool has always fully drained by the time this
    /// runs, so the revert cannot race in-flight progress.
    async fn recover_or_bail(&self, err: TransferError, expired_retries: &mut usize) -> Result<()> {
        let inner = &self.inner;

        if inner.control.cancel_root.is_cancelled() {
            inner.buffer.discard_unflushed();
            inner.progress.revert_unflushed();
            return Err(TransferError::Cancelled);
        }

        if inner.control.is_paused() {
            // Pause caused the abort. Revert and hand control back to the
            // loop, which waits for resume; pause() is blocked on this
            // revert completing.
            inner.buffer.discard_unflushed();
            inner.progress.revert_unflushed();
            debug!(id = %inner.record.id, "Round aborted by pause");
            return Ok(());
        }

        if err.is_expired_reference() {
            if *expired_retries < inner.config.expired_reference_retry_limit {
                *expired_retries += 1;
                inner.buffer.discard_unflushed();
                inner.progress.revert_unflushed();
                inner.control.refresh_token();
                info!(
                    id = %inner.record.id,
                    retry = *expired_retries,
                    "Block references expired; re-fetching descriptors"
                );
                return Ok(());
            }
            return match err {
                TransferError::BlockClient(cause) => Err(TransferError::ExpiredReferenceRetriesExhausted(cause)),
                other => Err(other),
            };
        }

        if err.is_network() {
            // Pause before notifying, so a caller that resumes immediately
            // still finds the drain already done.
            inner.buffer.discard_unflushed();
            inner.progress.revert_unflushed();
            inner.control.paused.store(true, Ordering::Release);
            inner.record.enter_paused();
            warn!(id = %inner.record.id, error = %err, "Network interrupted; awaiting resume");
            inner.events.send(TransferEvent::NetworkInterrupted {
                id: inner.record.id.clone(),
                error: err,
            });
            return Ok(());
        }

        if err.is_cancellation() {
            // The fetch token was canceled without the transfer itself
            // being canceled: a pause landed and a fast resume may already
            // have cleared the flag before this classification ran. The
            // pool has drained, so revert and replay from the flushed
            // boundary; if the pause is still standing the loop waits.
            inner.buffer.discard_unflushed();
            inner.progress.revert_unflushed();
            return Ok(());
        }

        Err(err)
    }

    async fn wait_if_paused(&self) -> Result<()> {
        self.inner.control.wait_if_paused().await
    }
}

/// One worker: wait for buffer capacity, fetch the block as a stream,
/// account progress per received chunk, apply the content transform, and
/// buffer the output. The worker that owns the active index additionally
/// performs the flush walk that drains consecutive completed entries to
/// the sink.
async fn fetch_and_flush(ctx: Arc<WorkerCtx>, block: BlockInfo, token: CancellationToken) -> Result<()> {
    let index = block.index;

    let capacity = tokio::select! {
        _ = token.cancelled() => return Err(TransferError::Cancelled),
        permit = ctx.capacity.clone().acquire_owned() => permit?,
    };
    ctx.buffer.open_slot(index, capacity);

    let raw = ctx.fetcher.fetch_block(&block, token.clone()).await?;

    let progress = ctx.progress.clone();
    let observed: ByteStream = raw
        .inspect_ok(move |chunk| progress.record(index, chunk.len() as u64))
        .boxed();

    let mut stream = match &ctx.transform {
        Some(t) => t.decrypt_stream(index, observed, block.enc_signature.as_deref()).await?,
        None => observed,
    };

    loop {
        let chunk = tokio::select! {
            _ = token.cancelled() => return Err(TransferError::Cancelled),
            c = stream.try_next() => c.map_err(TransferError::from)?,
        };
        let Some(chunk) = chunk else { break };
        ctx.buffer.push_chunk(index, chunk);
    }
    ctx.buffer.mark_done(index);

    if ctx.buffer.is_active(index) {
        // Only the worker owning the active index drains; holding the sink
        // across the walk keeps release order identical to index order.
        let mut sink = ctx.sink.lock().await;
        while let Some((flush_index, chunks)) = ctx.buffer.take_ready() {
            for chunk in chunks {
                sink.write(chunk).await?;
            }
            ctx.progress.settle(flush_index);
            debug!(index = flush_index, "Block flushed");
        }
    }

    Ok(())
}
