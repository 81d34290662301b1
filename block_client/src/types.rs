use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Descriptor of one fixed-range slice of file content.
///
/// Indices are 1-based and contiguous over the whole file; they define both
/// the upload ordering and the byte ordering the output sink requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub index: u64,
    /// Pre-authorized URL (or opaque token) the block body is fetched from.
    pub url: String,
    /// Integrity hash of the encrypted block body, hex encoded.
    pub hash: String,
    /// Signature over the encrypted block, when the revision carries one.
    pub enc_signature: Option<String>,
}

/// One page of results from a [`BlockSource`](crate::BlockSource).
///
/// Resolved once at the start of a download: either the source pages out
/// block descriptors, or the content was already materialized (legacy or
/// cached revisions) and there is nothing to fetch.
#[derive(Debug, Clone)]
pub enum BlockPage {
    Paged(Vec<BlockInfo>),
    Preloaded(Bytes),
}

/// Pagination cursor for block-descriptor metadata.
///
/// A returned page of exactly `page_size` descriptors signals that more
/// pages exist; a short page terminates the iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPagination {
    pub from_block_index: u64,
    pub page_size: usize,
}

impl BlockPagination {
    pub fn starting_at(from_block_index: u64, page_size: usize) -> Self {
        Self {
            from_block_index,
            page_size,
        }
    }
}

/// Remote handle returned for a successfully uploaded block, recorded by
/// index until the revision is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockToken(pub String);

/// File metadata attached to a transfer at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMeta {
    pub name: String,
    pub mime_type: String,
    /// Declared size; may be unknown until negotiated with the remote.
    pub size: Option<u64>,
}

/// A created-but-uncommitted remote revision. Deleted as a compensating
/// action if the commit fails, so an incomplete revision is never left
/// visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRevision {
    pub file_id: String,
    pub revision_id: String,
    /// The name the draft was created under, after any conflict resolution.
    pub name: String,
}

/// Content-hash manifest over a revision's ordered block tokens, plus the
/// signature produced by the [`ManifestSigner`](crate::ManifestSigner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedManifest {
    pub manifest_hash: Vec<u8>,
    pub signature: String,
}
