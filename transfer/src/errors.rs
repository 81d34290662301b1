use std::sync::Arc;

use block_client::BlockClientError;
use thiserror::Error;

/// Errors reported for a transfer.
///
/// Only the fatal class ever moves a transfer into the `Error` state;
/// cancellation is distinguishable so callers can suppress user-facing
/// noise, and the expired-reference and network classes are resolved
/// internally by the engines before they would surface here.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    #[error("Transfer canceled")]
    Cancelled,

    #[error("Name conflict on {0:?}")]
    Conflict(String),

    #[error("Block reference retry budget exhausted: {0}")]
    ExpiredReferenceRetriesExhausted(Arc<BlockClientError>),

    #[error("Block client error: {0}")]
    BlockClient(Arc<BlockClientError>),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TransferError>;

impl From<BlockClientError> for TransferError {
    fn from(err: BlockClientError) -> Self {
        if err.is_cancellation() {
            TransferError::Cancelled
        } else {
            TransferError::BlockClient(Arc::new(err))
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        TransferError::Internal(format!("Task join error: {err}"))
    }
}

impl From<tokio::sync::AcquireError> for TransferError {
    fn from(err: tokio::sync::AcquireError) -> Self {
        TransferError::Internal(format!("Permit acquisition error: {err}"))
    }
}

impl TransferError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, TransferError::Conflict(_))
    }

    /// An expired block reference recoverable by re-fetching descriptors.
    pub fn is_expired_reference(&self) -> bool {
        matches!(self, TransferError::BlockClient(e) if e.is_expired_reference())
    }

    /// A connectivity failure recoverable once the network returns.
    pub fn is_network(&self) -> bool {
        matches!(self, TransferError::BlockClient(e) if e.is_network())
    }
}
