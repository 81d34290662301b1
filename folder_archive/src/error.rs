use std::sync::Arc;

use block_client::BlockClientError;
use thiserror::Error;
use transfer::TransferError;

/// Errors from folder traversal and archive generation.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ArchiveError {
    #[error("Archive canceled")]
    Cancelled,

    #[error("Folder listing error: {0}")]
    Listing(Arc<BlockClientError>),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Archive entry {path:?} too large ({size} bytes)")]
    EntryTooLarge { path: String, size: u64 },

    #[error("Too many archive entries")]
    TooManyEntries,

    #[error("Archive exceeds format size limits")]
    ArchiveTooLarge,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl From<BlockClientError> for ArchiveError {
    fn from(err: BlockClientError) -> Self {
        if err.is_cancellation() {
            ArchiveError::Cancelled
        } else {
            ArchiveError::Listing(Arc::new(err))
        }
    }
}

impl ArchiveError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ArchiveError::Cancelled)
            || matches!(self, ArchiveError::Transfer(e) if e.is_cancellation())
    }
}
