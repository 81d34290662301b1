use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use block_client::{BlockFetcher, TransferMeta};
use drive_config::{ArchiveConfig, DownloadConfig};
use tokio::sync::Semaphore;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ArchiveError, Result};
use crate::tree_loader::ChildIterator;
use crate::types::{DiscoveredEntry, EntryKind, FolderSource};
use transfer::{ChannelSink, ContentTransform, DownloadEngine, SinkChunk, TransferState};

/// One archive entry in discovery order. Files carry the pipe their bytes
/// arrive through as the underlying download progresses.
pub enum ArchiveItem {
    Folder {
        path: Vec<String>,
    },
    File {
        path: Vec<String>,
        size: Option<u64>,
        content: Receiver<SinkChunk>,
    },
}

/// Pulls tree entries and runs a bounded number of concurrent per-entry
/// downloads, yielding items strictly in entry-discovery order even though
/// the downloads complete out of order.
///
/// The reordering needs no buffer of its own: each file is paired with its
/// byte pipe at spawn time, and items are handed out in spawn order, so the
/// consumer drains pipes in discovery order while later downloads already
/// fill theirs behind it.
pub struct ConcurrentIterator {
    entries: ChildIterator,
    source: Arc<dyn FolderSource>,
    fetcher: Arc<dyn BlockFetcher>,
    transform: Option<Arc<dyn ContentTransform>>,
    download_config: DownloadConfig,
    pipe_depth: usize,
    lookahead_limit: usize,
    lookahead: VecDeque<ArchiveItem>,
    controls: IterControls,
}

/// Shared control surface: pause/resume/cancel propagate to every
/// currently active per-file download.
#[derive(Clone)]
pub struct IterControls {
    shared: Arc<ControlsShared>,
}

struct ControlsShared {
    cancel: CancellationToken,
    paused: AtomicBool,
    gate: Arc<Semaphore>,
    engines: Mutex<Vec<DownloadEngine>>,
}

impl IterControls {
    fn new(max_concurrent_files: usize) -> Self {
        Self {
            shared: Arc::new(ControlsShared {
                cancel: CancellationToken::new(),
                paused: AtomicBool::new(false),
                gate: Arc::new(Semaphore::new(max_concurrent_files.max(1))),
                engines: Mutex::new(Vec::new()),
            }),
        }
    }

    pub async fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        let engines = self.shared.engines.lock().unwrap().clone();
        for engine in engines {
            engine.pause().await;
        }
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        for engine in self.shared.engines.lock().unwrap().iter() {
            engine.resume();
        }
    }

    /// Aborts all active downloads and stops consuming further entries.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
        for engine in self.shared.engines.lock().unwrap().iter() {
            engine.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    fn track(&self, engine: DownloadEngine) {
        let mut engines = self.shared.engines.lock().unwrap();
        engines.retain(|e| {
            !matches!(
                e.state(),
                TransferState::Done | TransferState::Canceled | TransferState::Error
            )
        });
        engines.push(engine);
    }
}

impl ConcurrentIterator {
    pub fn new(
        entries: ChildIterator,
        source: Arc<dyn FolderSource>,
        fetcher: Arc<dyn BlockFetcher>,
        transform: Option<Arc<dyn ContentTransform>>,
        archive_config: &ArchiveConfig,
        download_config: DownloadConfig,
    ) -> Self {
        let controls = IterControls::new(archive_config.max_concurrent_files);
        Self {
            entries,
            source,
            fetcher,
            transform,
            download_config,
            pipe_depth: archive_config.pipe_depth.max(1),
            lookahead_limit: archive_config.max_concurrent_files.max(1) * 2,
            lookahead: VecDeque::new(),
            controls,
        }
    }

    pub fn controls(&self) -> IterControls {
        self.controls.clone()
    }

    /// The next item in discovery order; `Ok(None)` once the tree is
    /// exhausted.
    pub async fn next(&mut self) -> Result<Option<ArchiveItem>> {
        self.fill_lookahead().await?;
        if self.controls.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        Ok(self.lookahead.pop_front())
    }

    /// Keeps a bounded number of entries spawned ahead of consumption.
    /// Blocks for discovery only when there is nothing to yield yet.
    async fn fill_lookahead(&mut self) -> Result<()> {
        while self.lookahead.len() < self.lookahead_limit {
            if self.controls.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }

            let entry = if self.lookahead.is_empty() {
                match self.entries.next().await? {
                    Some(e) => e,
                    None => break,
                }
            } else {
                match self.entries.poll_next()? {
                    Some(e) => e,
                    None => break,
                }
            };

            self.spawn_entry(entry).await;
        }
        Ok(())
    }

    async fn spawn_entry(&mut self, discovered: DiscoveredEntry) {
        let path = discovered.path_segments();

        match discovered.entry.kind {
            EntryKind::Folder => {
                debug!(path = %path.join("/"), "Queued folder record");
                self.lookahead.push_back(ArchiveItem::Folder { path });
            },
            EntryKind::File => {
                let (sink, content) = ChannelSink::new(self.pipe_depth);
                let meta = TransferMeta {
                    name: discovered.entry.name.clone(),
                    mime_type: "application/octet-stream".to_string(),
                    size: discovered.entry.size,
                };
                let block_source = self.source.block_source(&discovered.entry.id);
                // Per-file download errors arrive in-band through the pipe
                // as an abort chunk, so the event channel goes unwatched.
                let (engine, _events) = DownloadEngine::new(
                    meta,
                    block_source,
                    self.fetcher.clone(),
                    self.transform.clone(),
                    Box::new(sink),
                    self.download_config.clone(),
                );

                if self.controls.shared.paused.load(Ordering::Acquire) {
                    engine.pause().await;
                }
                self.controls.track(engine.clone());

                let gate = self.controls.shared.gate.clone();
                let cancel = self.controls.shared.cancel.clone();
                let label = path.join("/");
                tokio::spawn(async move {
                    let _slot = tokio::select! {
                        _ = cancel.cancelled() => {
                            engine.cancel();
                            return;
                        },
                        permit = gate.acquire_owned() => match permit {
                            Ok(p) => p,
                            Err(_) => return,
                        },
                    };
                    if let Err(e) = engine.start().await {
                        if !e.is_cancellation() {
                            warn!(path = %label, error = %e, "Archived file download failed");
                        }
                    }
                });

                self.lookahead.push_back(ArchiveItem::File {
                    path,
                    size: discovered.entry.size,
                    content,
                });
            },
        }
    }
}
