use std::collections::HashMap;
use std::sync::Arc;

use block_client::{ByteStream, DraftRevision, ManifestSigner, TransferMeta, UploadDestination};
use drive_config::UploadConfig;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, warn};
use utils::UniqueId;

use crate::errors::{Result, TransferError};
use crate::events::TransferEvent;
use crate::model::{TransferId, TransferState};
use crate::transform::ContentTransform;
use crate::upload::conflict::{
    ConflictChoice, ConflictDecision, ConflictPrompt, ConflictResolver, disambiguated_name,
};
use crate::upload::engine::UploadEngine;

/// Admits uploads into a bounded set of active slots, serializes setup for
/// uploads sharing a target name, and mediates conflict prompts so exactly
/// one is outstanding at a time.
///
/// The queue owns the registry of its transfers; entries leave the registry
/// only through an explicit [`remove`](UploadQueue::remove), never
/// implicitly.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: UploadConfig,
    destination: Arc<dyn UploadDestination>,
    signer: Arc<dyn ManifestSigner>,
    transform: Option<Arc<dyn ContentTransform>>,
    resolver: Arc<dyn ConflictResolver>,
    admission: Arc<Semaphore>,
    registry: std::sync::Mutex<HashMap<TransferId, UploadEngine>>,
    /// Serializes draft setup per (folder, name) so a batch of files that
    /// resolve to the same default name cannot race each other into
    /// duplicate names.
    name_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// Held while a conflict prompt is outstanding.
    conflict_gate: AsyncMutex<()>,
    batch: std::sync::Mutex<BatchScope>,
}

/// An "apply to all" decision covers the current batch: it persists until
/// every upload admitted under this scope has drained, then resets so a
/// future batch prompts again.
struct BatchScope {
    id: UniqueId,
    active: usize,
    blanket: Option<ConflictChoice>,
}

impl UploadQueue {
    pub fn new(
        destination: Arc<dyn UploadDestination>,
        signer: Arc<dyn ManifestSigner>,
        transform: Option<Arc<dyn ContentTransform>>,
        resolver: Arc<dyn ConflictResolver>,
        config: UploadConfig,
    ) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_active_uploads.max(1)));
        Self {
            inner: Arc::new(QueueInner {
                config,
                destination,
                signer,
                transform,
                resolver,
                admission,
                registry: std::sync::Mutex::new(HashMap::new()),
                name_locks: AsyncMutex::new(HashMap::new()),
                conflict_gate: AsyncMutex::new(()),
                batch: std::sync::Mutex::new(BatchScope {
                    id: UniqueId::new(),
                    active: 0,
                    blanket: None,
                }),
            }),
        }
    }

    /// Queues an upload. The returned engine stays `Pending` until an
    /// active slot frees; the driver task then runs setup, conflict
    /// resolution, block upload, and finalize.
    pub fn enqueue(
        &self,
        folder_id: &str,
        meta: TransferMeta,
        content: ByteStream,
    ) -> (UploadEngine, UnboundedReceiver<TransferEvent>) {
        let inner = &self.inner;
        let (engine, rx) = UploadEngine::new(
            folder_id.to_string(),
            meta,
            content,
            inner.destination.clone(),
            inner.signer.clone(),
            inner.transform.clone(),
            inner.config.clone(),
        );

        inner.registry.lock().unwrap().insert(engine.id().clone(), engine.clone());
        inner.batch.lock().unwrap().active += 1;

        let queue = self.inner.clone();
        let driver = engine.clone();
        tokio::spawn(async move {
            let result = drive_upload(&queue, &driver).await;
            if let Err(err) = &result {
                debug!(id = %driver.id(), error = %err, "Upload ended unsuccessfully");
            }

            let mut batch = queue.batch.lock().unwrap();
            batch.active -= 1;
            if batch.active == 0 {
                // Batch drained: the blanket decision expires with it.
                debug!(batch = ?batch.id, "Upload batch drained; conflict scope reset");
                batch.blanket = None;
                batch.id = UniqueId::new();
            }
        });

        (engine, rx)
    }

    pub fn get(&self, id: &TransferId) -> Option<UploadEngine> {
        self.inner.registry.lock().unwrap().get(id).cloned()
    }

    /// Explicitly discards a transfer from tracking.
    pub fn remove(&self, id: &TransferId) -> bool {
        self.inner.registry.lock().unwrap().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.registry.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.lock().unwrap().is_empty()
    }
}

async fn drive_upload(queue: &Arc<QueueInner>, engine: &UploadEngine) -> Result<()> {
    // Queue admission: at most `max_active_uploads` transfers move past
    // Pending, independent of per-upload block concurrency.
    let _active = tokio::select! {
        _ = engine.inner.control.cancel_root.cancelled() => {
            engine.inner.record.set_state(TransferState::Canceled);
            engine.inner.events.send(TransferEvent::Failed { error: TransferError::Cancelled });
            return Err(TransferError::Cancelled);
        },
        permit = queue.admission.clone().acquire_owned() => permit.map_err(TransferError::from)?,
    };

    engine.inner.record.set_state(TransferState::Initializing);

    let draft = match create_draft_resolving_conflicts(queue, engine).await {
        Ok(draft) => draft,
        Err(err) => {
            if err.is_cancellation() {
                engine.inner.record.set_state(TransferState::Canceled);
            } else {
                engine.inner.record.set_error(err.clone());
            }
            engine.inner.events.send(TransferEvent::Failed { error: err.clone() });
            return Err(err);
        },
    };

    engine.run_blocks(draft).await
}

/// Creates the draft revision, serialized per target name, suspending on
/// `Conflict` until a decision arrives and applying rename/replace/skip.
async fn create_draft_resolving_conflicts(queue: &Arc<QueueInner>, engine: &UploadEngine) -> Result<DraftRevision> {
    let folder_id = engine.inner.folder_id.clone();
    let base_name = engine.meta().name.clone();
    let meta = engine.meta().clone();

    let name_lock = {
        let key = format!("{folder_id}/{base_name}");
        let mut locks = queue.name_locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    };
    let _name_guard = name_lock.lock().await;

    let mut name = base_name.clone();
    let mut rename_attempt: u32 = 0;

    loop {
        let token = engine.current_token();
        let created = queue.destination.create_draft(&folder_id, &name, &meta, &token).await;

        match created {
            Ok(draft) => {
                if rename_attempt > 0 {
                    info!(id = %engine.id(), original = %base_name, renamed = %name, "Upload renamed after conflict");
                }
                return Ok(draft);
            },
            Err(e) if e.is_conflict() => {
                if rename_attempt > 0 {
                    // Already renaming; try the next candidate without
                    // prompting again.
                    rename_attempt += 1;
                    name = disambiguated_name(&base_name, rename_attempt);
                    continue;
                }

                engine.inner.record.set_state(TransferState::Conflict);
                debug!(id = %engine.id(), name = %name, "Name conflict; awaiting decision");

                let decision = resolve_conflict(
                    queue,
                    ConflictPrompt {
                        transfer_id: engine.id().clone(),
                        name: name.clone(),
                    },
                )
                .await;

                engine.inner.record.set_state(TransferState::Initializing);

                match decision.choice {
                    ConflictChoice::Rename => {
                        rename_attempt = 1;
                        name = disambiguated_name(&base_name, rename_attempt);
                    },
                    ConflictChoice::Replace => {
                        queue
                            .destination
                            .remove_existing(&folder_id, &name)
                            .await
                            .map_err(TransferError::from)?;
                    },
                    ConflictChoice::Skip => {
                        info!(id = %engine.id(), name = %name, "Upload skipped after conflict");
                        return Err(TransferError::Cancelled);
                    },
                }
            },
            Err(e) if e.is_cancellation() => return Err(TransferError::Cancelled),
            Err(e) => {
                warn!(id = %engine.id(), error = %e, "Draft creation failed");
                return Err(e.into());
            },
        }
    }
}

/// Applies the batch's blanket decision if one exists, otherwise surfaces a
/// prompt; at most one is outstanding at a time across all pending
/// conflicts.
async fn resolve_conflict(queue: &Arc<QueueInner>, prompt: ConflictPrompt) -> ConflictDecision {
    if let Some(choice) = queue.batch.lock().unwrap().blanket {
        return ConflictDecision {
            choice,
            apply_to_all: true,
        };
    }

    let _gate = queue.conflict_gate.lock().await;

    // Another conflict may have been answered with "apply to all" while we
    // waited for the gate.
    if let Some(choice) = queue.batch.lock().unwrap().blanket {
        return ConflictDecision {
            choice,
            apply_to_all: true,
        };
    }

    let decision = queue.resolver.resolve(prompt).await;
    if decision.apply_to_all {
        queue.batch.lock().unwrap().blanket = Some(decision.choice);
    }
    decision
}
