use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use block_client::{
    BlockToken, ByteStream, DraftRevision, ManifestSigner, SignedManifest, TransferMeta, UploadDestination,
};
use bytes::{Bytes, BytesMut};
use drive_config::UploadConfig;
use futures::TryStreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::ControlState;
use crate::errors::{Result, TransferError};
use crate::events::{EventSender, TransferEvent, event_channel};
use crate::model::{TransferId, TransferRecord, TransferState};
use crate::transform::{ContentTransform, EncryptedBlock};

/// Splits content into fixed-size blocks, uploads them with bounded
/// concurrency, and finalizes the remote revision exactly once.
///
/// Created by [`UploadQueue::enqueue`](crate::UploadQueue::enqueue), which
/// also runs conflict mediation and admission before handing the engine a
/// draft revision to fill.
#[derive(Clone)]
pub struct UploadEngine {
    pub(crate) inner: Arc<UploadInner>,
}

pub(crate) struct UploadInner {
    pub record: TransferRecord,
    pub folder_id: String,
    pub config: UploadConfig,
    pub destination: Arc<dyn UploadDestination>,
    pub signer: Arc<dyn ManifestSigner>,
    pub transform: Option<Arc<dyn ContentTransform>>,
    pub events: EventSender,
    pub control: ControlState,
    chunker: AsyncMutex<Chunker>,
    /// Blocks chunked off the content but not yet tokened. Replayed after a
    /// pause or network interruption; entries leave the moment their token
    /// is recorded, so nothing is ever uploaded twice.
    pending: AsyncMutex<BTreeMap<u64, Bytes>>,
    /// Remote token per uploaded block, keyed by index, kept until finalize.
    tokens: std::sync::Mutex<BTreeMap<u64, BlockToken>>,
}

/// Re-chunks an arbitrary content stream into upload blocks of the
/// configured size. Indices are 1-based and assigned in chunking order.
struct Chunker {
    stream: ByteStream,
    buf: BytesMut,
    next_index: u64,
    exhausted: bool,
}

impl Chunker {
    fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            next_index: 1,
            exhausted: false,
        }
    }

    async fn next_block(&mut self, block_size: usize, token: &CancellationToken) -> Result<Option<(u64, Bytes)>> {
        while !self.exhausted && self.buf.len() < block_size {
            let chunk = tokio::select! {
                _ = token.cancelled() => return Err(TransferError::Cancelled),
                c = self.stream.try_next() => c.map_err(TransferError::from)?,
            };
            match chunk {
                Some(c) => self.buf.extend_from_slice(&c),
                None => self.exhausted = true,
            }
        }

        let data = if self.buf.len() >= block_size {
            self.buf.split_to(block_size).freeze()
        } else if !self.buf.is_empty() {
            self.buf.split().freeze()
        } else {
            return Ok(None);
        };

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some((index, data)))
    }
}

impl UploadEngine {
    pub(crate) fn new(
        folder_id: String,
        meta: TransferMeta,
        content: ByteStream,
        destination: Arc<dyn UploadDestination>,
        signer: Arc<dyn ManifestSigner>,
        transform: Option<Arc<dyn ContentTransform>>,
        config: UploadConfig,
    ) -> (Self, UnboundedReceiver<TransferEvent>) {
        let (events, rx) = event_channel();
        let engine = Self {
            inner: Arc::new(UploadInner {
                record: TransferRecord::new(meta),
                folder_id,
                config,
                destination,
                signer,
                transform,
                events,
                control: ControlState::new(),
                chunker: AsyncMutex::new(Chunker::new(content)),
                pending: AsyncMutex::new(BTreeMap::new()),
                tokens: std::sync::Mutex::new(BTreeMap::new()),
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

    /// Aborts the in-flight block requests. Resuming restores `Progress`
    /// rather than restarting from `Pending`: blocks that already have a
    /// token keep it across the pause.
    pub fn pause(&self) {
        let inner = &self.inner;
        inner.control.paused.store(true, Ordering::Release);
        inner.control.cancel_fetch();
        inner.record.enter_paused();
    }

    pub fn resume(&self) {
        let inner = &self.inner;
        inner.control.refresh_token();
        inner.control.paused.store(false, Ordering::Release);
        inner.record.leave_paused();
        inner.control.resume_notify.notify_waiters();
    }

    /// Aborts the upload. Idempotent. A created-but-unfinalized draft is
    /// deleted by the running driver as a compensating action.
    pub fn cancel(&self) {
        let inner = &self.inner;
        if inner.control.is_cancelled() {
            return;
        }
        inner.control.cancel_root.cancel();
        inner.control.cancel_fetch();
        inner.control.resume_notify.notify_waiters();
    }

    pub(crate) fn current_token(&self) -> CancellationToken {
        self.inner.control.current_token()
    }

    /// Uploads all blocks into the draft and commits the revision. On any
    /// terminal failure (cancellation included) the draft is deleted so no
    /// orphaned incomplete revision stays visible.
    pub(crate) async fn run_blocks(&self, draft: DraftRevision) -> Result<()> {
        let inner = &self.inner;
        inner.record.set_state(TransferState::Progress);
        inner.events.send(TransferEvent::Started);

        match self.run_blocks_inner(&draft).await {
            Ok(()) => {
                inner.record.set_state(TransferState::Done);
                inner.events.send(TransferEvent::Finished);
                info!(id = %inner.record.id, name = %draft.name, "Upload finished");
                Ok(())
            },
            Err(err) => {
                if let Err(delete_err) = inner.destination.delete_draft(&draft).await {
                    warn!(id = %inner.record.id, error = %delete_err, "Compensating draft deletion failed");
                }
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

    async fn run_blocks_inner(&self, draft: &DraftRevision) -> Result<()> {
        let inner = &self.inner;

        loop {
            inner.control.wait_if_paused().await?;
            let token = inner.control.current_token();

            match self.upload_round(draft, &token).await {
                Ok(()) => break,
                Err(err) => self.recover_or_bail(err).await?,
            }
        }

        inner.record.set_state(TransferState::Finalizing);

        let manifest_hash = self.manifest_hash()?;
        let signature = inner
            .signer
            .sign(&manifest_hash)
            .await
            .map_err(TransferError::from)?;
        let manifest = SignedManifest {
            manifest_hash,
            signature,
        };

        inner
            .destination
            .commit_revision(draft, &manifest)
            .await
            .map_err(TransferError::from)?;

        Ok(())
    }

    /// One bounded-concurrency pass over the remaining blocks: replay any
    /// chunked-but-untokened blocks first, then keep chunking new ones. A
    /// block-slot permit is taken before chunking, so read-ahead is bounded
    /// by the upload concurrency.
    async fn upload_round(&self, draft: &DraftRevision, token: &CancellationToken) -> Result<()> {
        let inner = &self.inner;
        let block_size = inner.config.block_size.as_u64().max(1) as usize;
        let slots = Arc::new(Semaphore::new(inner.config.max_concurrent_block_uploads.max(1)));
        let mut pool: JoinSet<Result<()>> = JoinSet::new();
        let mut failed: Option<TransferError> = None;

        let replay: Vec<(u64, Bytes)> = inner.pending.lock().await.iter().map(|(i, d)| (*i, d.clone())).collect();

        let mut work = replay.into_iter();
        loop {
            // Surface worker failures early and abort the rest; only the
            // first error is the round's cause, the rest are echoes of the
            // abort.
            while let Some(joined) = pool.try_join_next() {
                if let Err(e) = joined.unwrap_or_else(|e| Err(e.into())) {
                    if failed.is_none() {
                        token.cancel();
                        failed = Some(e);
                    }
                }
            }
            if failed.is_some() {
                break;
            }

            let permit = tokio::select! {
                _ = token.cancelled() => {
                    failed = Some(TransferError::Cancelled);
                    break;
                },
                p = slots.clone().acquire_owned() => p?,
            };

            let next = match work.next() {
                Some(block) => Some(block),
                None => {
                    let mut chunker = inner.chunker.lock().await;
                    match chunker.next_block(block_size, token).await {
                        Ok(Some(block)) => {
                            inner.pending.lock().await.insert(block.0, block.1.clone());
                            Some(block)
                        },
                        Ok(None) => None,
                        Err(e) => {
                            token.cancel();
                            failed = Some(e);
                            break;
                        },
                    }
                },
            };

            let Some((index, data)) = next else {
                drop(permit);
                break;
            };

            let task_inner = self.inner.clone();
            let draft = draft.clone();
            let token = token.clone();
            pool.spawn(async move {
                let _slot = permit;
                upload_block_task(task_inner, draft, index, data, token).await
            });
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined.unwrap_or_else(|e| Err(e.into())) {
                if failed.is_none() {
                    token.cancel();
                    failed = Some(e);
                }
            }
        }

        match failed {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn recover_or_bail(&self, err: TransferError) -> Result<()> {
        let inner = &self.inner;

        if inner.control.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        if inner.control.is_paused() {
            debug!(id = %inner.record.id, "Upload round aborted by pause");
            return Ok(());
        }

        if err.is_network() {
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
            // Aborted by a pause whose resume already cleared the flag;
            // the round has drained, so replay the untokened blocks.
            return Ok(());
        }

        Err(err)
    }

    /// Content-hash manifest over the ordered token list. Fails if any
    /// block index is missing a token.
    fn manifest_hash(&self) -> Result<Vec<u8>> {
        let tokens = self.inner.tokens.lock().unwrap();
        let mut hasher = Sha256::new();
        let mut expected = 1u64;
        for (index, token) in tokens.iter() {
            if *index != expected {
                return Err(TransferError::Internal(format!(
                    "missing block token at index {expected}"
                )));
            }
            expected += 1;
            hasher.update(index.to_be_bytes());
            hasher.update(token.0.as_bytes());
        }
        Ok(hasher.finalize().to_vec())
    }
}

async fn upload_block_task(
    inner: Arc<UploadInner>,
    draft: DraftRevision,
    index: u64,
    data: Bytes,
    token: CancellationToken,
) -> Result<()> {
    let encrypted = match &inner.transform {
        Some(t) => t.encrypt_block(index, data.clone()).await?,
        None => EncryptedBlock {
            hash: hex::encode(Sha256::digest(&data)),
            data: data.clone(),
            enc_signature: None,
        },
    };

    let upload = inner.destination.upload_block(&draft, index, encrypted.data, &encrypted.hash, &token);
    let block_token = tokio::select! {
        _ = token.cancelled() => return Err(TransferError::Cancelled),
        r = upload => r.map_err(TransferError::from)?,
    };

    inner.tokens.lock().unwrap().insert(index, block_token);
    inner.pending.lock().await.remove(&index);
    inner.events.progress(data.len() as i64);
    debug!(index, bytes = data.len(), "Block uploaded");
    Ok(())
}
