use bytes::Bytes;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{BlockInfo, BlockPage, BlockPagination, BlockToken, DraftRevision, SignedManifest, TransferMeta};

/// A stream of body chunks for a single block.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Paged accessor for a transfer's block descriptors.
///
/// Implemented by the metadata API client; a full page (`len() ==
/// page_size`) signals that more pages exist. A source may instead return
/// [`BlockPage::Preloaded`] when the content is already materialized, in
/// which case no block fetches happen at all.
#[async_trait::async_trait]
pub trait BlockSource: Send + Sync {
    async fn get_blocks(&self, pagination: BlockPagination, cancel: &CancellationToken) -> Result<BlockPage>;
}

/// Fetches a single block's body over the network as a byte stream.
///
/// [`RemoteBlockFetcher`](crate::RemoteBlockFetcher) is the HTTP
/// implementation; tests substitute in-memory fakes.
#[async_trait::async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn fetch_block(&self, block: &BlockInfo, cancel: CancellationToken) -> Result<ByteStream>;
}

/// Remote operations an upload needs: draft creation, block upload, commit,
/// and the compensating draft deletion.
///
/// `create_draft` fails with
/// [`BlockClientError::NameConflict`](crate::BlockClientError::NameConflict)
/// when the target name is taken; the upload queue then suspends the
/// transfer until a conflict decision arrives.
#[async_trait::async_trait]
pub trait UploadDestination: Send + Sync {
    async fn create_draft(
        &self,
        folder_id: &str,
        name: &str,
        meta: &TransferMeta,
        cancel: &CancellationToken,
    ) -> Result<DraftRevision>;

    async fn upload_block(
        &self,
        draft: &DraftRevision,
        index: u64,
        data: Bytes,
        hash: &str,
        cancel: &CancellationToken,
    ) -> Result<BlockToken>;

    async fn commit_revision(&self, draft: &DraftRevision, manifest: &SignedManifest) -> Result<()>;

    async fn delete_draft(&self, draft: &DraftRevision) -> Result<()>;

    /// Removes the existing file occupying `name`, clearing the way for a
    /// replace decision.
    async fn remove_existing(&self, folder_id: &str, name: &str) -> Result<()>;
}

/// Signs the content-hash manifest committed with a finalized revision.
/// Opaque stand-in for the account's signing key.
#[async_trait::async_trait]
pub trait ManifestSigner: Send + Sync {
    async fn sign(&self, manifest_hash: &[u8]) -> Result<String>;
}
