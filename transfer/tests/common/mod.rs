//! In-memory fakes for the transfer engines' collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use block_client::{
    BlockClientError, BlockFetcher, BlockInfo, BlockPage, BlockPagination, BlockSource, BlockToken, ByteStream,
    DraftRevision, ManifestSigner, SignedManifest, TransferMeta, UploadDestination,
};
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use transfer::{ConflictChoice, ConflictDecision, ConflictPrompt, ConflictResolver};

pub fn meta(name: &str, size: u64) -> TransferMeta {
    TransferMeta {
        name: name.to_string(),
        mime_type: "application/octet-stream".to_string(),
        size: Some(size),
    }
}

/// Deterministic per-block content so ordering mistakes show up as byte
/// mismatches, not just length mismatches.
pub fn block_payload(index: u64, len: usize) -> Vec<u8> {
    (0..len).map(|j| ((index as usize * 31 + j) % 251) as u8).collect()
}

pub fn expected_content(sizes: &[usize]) -> Vec<u8> {
    sizes
        .iter()
        .enumerate()
        .flat_map(|(i, len)| block_payload(i as u64 + 1, *len))
        .collect()
}

#[derive(Clone, Copy, Debug)]
pub enum FailureKind {
    Expired,
    Network,
}

impl FailureKind {
    pub fn to_error(self) -> BlockClientError {
        match self {
            FailureKind::Expired => BlockClientError::ExpiredBlockReference("block URL expired".to_string()),
            FailureKind::Network => BlockClientError::Network("connection reset".to_string()),
        }
    }
}

/// Paged in-memory block-descriptor source.
pub struct FakeSource {
    blocks: Vec<BlockInfo>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(n_blocks: usize) -> Arc<Self> {
        let blocks = (1..=n_blocks as u64)
            .map(|index| BlockInfo {
                index,
                url: format!("mem://blocks/{index}"),
                hash: format!("{index:064x}"),
                enc_signature: None,
            })
            .collect();
        Arc::new(Self {
            blocks,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn metadata_calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl BlockSource for FakeSource {
    async fn get_blocks(
        &self,
        pagination: BlockPagination,
        _cancel: &CancellationToken,
    ) -> block_client::Result<BlockPage> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let page: Vec<BlockInfo> = self
            .blocks
            .iter()
            .filter(|b| b.index >= pagination.from_block_index)
            .take(pagination.page_size)
            .cloned()
            .collect();
        Ok(BlockPage::Paged(page))
    }
}

/// A source whose content is already materialized.
pub struct PreloadedSource(pub Bytes);

#[async_trait::async_trait]
impl BlockSource for PreloadedSource {
    async fn get_blocks(
        &self,
        _pagination: BlockPagination,
        _cancel: &CancellationToken,
    ) -> block_client::Result<BlockPage> {
        Ok(BlockPage::Preloaded(self.0.clone()))
    }
}

/// In-memory block fetcher with per-block delays and one-shot failure
/// injection, streaming each block in small chunks.
pub struct FakeFetcher {
    data: HashMap<u64, Bytes>,
    delays: HashMap<u64, Duration>,
    fail_once: Mutex<HashMap<u64, FailureKind>>,
    fetches: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(sizes: &[usize]) -> Arc<Self> {
        let data = sizes
            .iter()
            .enumerate()
            .map(|(i, len)| {
                let index = i as u64 + 1;
                (index, Bytes::from(block_payload(index, *len)))
            })
            .collect();
        Arc::new(Self {
            data,
            delays: HashMap::new(),
            fail_once: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn with_delays(mut self: Arc<Self>, delays: &[(u64, Duration)]) -> Arc<Self> {
        let this = Arc::get_mut(&mut self).expect("configure before sharing");
        this.delays = delays.iter().copied().collect();
        self
    }

    pub fn with_failure_once(self: Arc<Self>, index: u64, kind: FailureKind) -> Arc<Self> {
        self.fail_once.lock().unwrap().insert(index, kind);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl BlockFetcher for FakeFetcher {
    async fn fetch_block(&self, block: &BlockInfo, cancel: CancellationToken) -> block_client::Result<ByteStream> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        if let Some(kind) = self.fail_once.lock().unwrap().remove(&block.index) {
            return Err(kind.to_error());
        }

        if let Some(delay) = self.delays.get(&block.index).copied() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BlockClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {},
            }
        }

        let data = self
            .data
            .get(&block.index)
            .cloned()
            .ok_or_else(|| BlockClientError::InvalidResponse(format!("no such block {}", block.index)))?;

        // Stream in small chunks so reordering and progress see multiple
        // deliveries per block.
        let chunks: Vec<block_client::Result<Bytes>> = data.chunks(3).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Turns a byte buffer into a content stream for uploads.
pub fn content_stream(data: Vec<u8>, chunk_size: usize) -> ByteStream {
    let chunks: Vec<block_client::Result<Bytes>> = data
        .chunks(chunk_size.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures::stream::iter(chunks).boxed()
}

#[derive(Default)]
pub struct DestinationState {
    pub existing: HashSet<(String, String)>,
    pub drafts: HashMap<String, (String, String)>, // revision id -> (folder, name)
    pub blocks: HashMap<String, BTreeMap<u64, Bytes>>,
    pub committed: Vec<(String, SignedManifest)>,
    pub deleted_drafts: Vec<String>,
    next_revision: u64,
}

/// In-memory upload destination. Draft names reserve their slot, so two
/// setups racing to the same name conflict the way the remote would make
/// them.
pub struct FakeDestination {
    pub state: Mutex<DestinationState>,
    pub fail_commit: std::sync::atomic::AtomicBool,
    block_failures: Mutex<HashMap<u64, FailureKind>>,
    block_delay: Option<Duration>,
}

impl FakeDestination {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DestinationState::default()),
            fail_commit: std::sync::atomic::AtomicBool::new(false),
            block_failures: Mutex::new(HashMap::new()),
            block_delay: None,
        })
    }

    pub fn with_block_delay(mut self: Arc<Self>, delay: Duration) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("configure before sharing").block_delay = Some(delay);
        self
    }

    pub fn with_existing(self: Arc<Self>, folder_id: &str, name: &str) -> Arc<Self> {
        self.state
            .lock()
            .unwrap()
            .existing
            .insert((folder_id.to_string(), name.to_string()));
        self
    }

    pub fn with_block_failure_once(self: Arc<Self>, index: u64, kind: FailureKind) -> Arc<Self> {
        self.block_failures.lock().unwrap().insert(index, kind);
        self
    }

    pub fn committed_names(&self) -> Vec<String> {
        self.state.lock().unwrap().committed.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Reassembles the uploaded content of the revision committed under
    /// `name`.
    pub fn committed_content(&self, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let revision = state
            .drafts
            .iter()
            .find(|(_, (_, n))| n == name)
            .map(|(rev, _)| rev.clone())?;
        let blocks = state.blocks.get(&revision)?;
        Some(blocks.values().flat_map(|b| b.to_vec()).collect())
    }
}

#[async_trait::async_trait]
impl UploadDestination for FakeDestination {
    async fn create_draft(
        &self,
        folder_id: &str,
        name: &str,
        _meta: &TransferMeta,
        _cancel: &CancellationToken,
    ) -> block_client::Result<DraftRevision> {
        let mut state = self.state.lock().unwrap();
        let key = (folder_id.to_string(), name.to_string());
        let reserved = state.existing.contains(&key) || state.drafts.values().any(|(f, n)| f == folder_id && n == name);
        if reserved {
            return Err(BlockClientError::NameConflict(name.to_string()));
        }

        state.next_revision += 1;
        let revision_id = format!("rev-{}", state.next_revision);
        state
            .drafts
            .insert(revision_id.clone(), (folder_id.to_string(), name.to_string()));
        Ok(DraftRevision {
            file_id: format!("file-{revision_id}"),
            revision_id,
            name: name.to_string(),
        })
    }

    async fn upload_block(
        &self,
        draft: &DraftRevision,
        index: u64,
        data: Bytes,
        _hash: &str,
        cancel: &CancellationToken,
    ) -> block_client::Result<BlockToken> {
        if let Some(kind) = self.block_failures.lock().unwrap().remove(&index) {
            return Err(kind.to_error());
        }

        if let Some(delay) = self.block_delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BlockClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {},
            }
        }

        self.state
            .lock()
            .unwrap()
            .blocks
            .entry(draft.revision_id.clone())
            .or_default()
            .insert(index, data);
        Ok(BlockToken(format!("tok-{}-{}", draft.revision_id, index)))
    }

    async fn commit_revision(&self, draft: &DraftRevision, manifest: &SignedManifest) -> block_client::Result<()> {
        if self.fail_commit.load(Ordering::Relaxed) {
            return Err(BlockClientError::Status {
                status: 500,
                message: "commit failed".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        let (folder, name) = state
            .drafts
            .get(&draft.revision_id)
            .cloned()
            .ok_or_else(|| BlockClientError::InvalidResponse("unknown draft".to_string()))?;
        state.existing.insert((folder, name.clone()));
        state.committed.push((name, manifest.clone()));
        Ok(())
    }

    async fn delete_draft(&self, draft: &DraftRevision) -> block_client::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.drafts.remove(&draft.revision_id);
        state.blocks.remove(&draft.revision_id);
        state.deleted_drafts.push(draft.revision_id.clone());
        Ok(())
    }

    async fn remove_existing(&self, folder_id: &str, name: &str) -> block_client::Result<()> {
        self.state
            .lock()
            .unwrap()
            .existing
            .remove(&(folder_id.to_string(), name.to_string()));
        Ok(())
    }
}

pub struct FakeSigner;

#[async_trait::async_trait]
impl ManifestSigner for FakeSigner {
    async fn sign(&self, manifest_hash: &[u8]) -> block_client::Result<String> {
        Ok(format!("sig:{}", hex::encode(manifest_hash)))
    }
}

/// Scripted conflict resolver that counts how many prompts surfaced.
pub struct ScriptedResolver {
    pub decision: ConflictDecision,
    pub prompts: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new(choice: ConflictChoice, apply_to_all: bool) -> Arc<Self> {
        Arc::new(Self {
            decision: ConflictDecision { choice, apply_to_all },
            prompts: AtomicUsize::new(0),
        })
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl ConflictResolver for ScriptedResolver {
    async fn resolve(&self, _prompt: ConflictPrompt) -> ConflictDecision {
        self.prompts.fetch_add(1, Ordering::Relaxed);
        self.decision
    }
}
