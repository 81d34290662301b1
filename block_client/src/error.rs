use http::StatusCode;
use thiserror::Error;

/// Errors from the block-storage transport layer.
///
/// The variants map onto the recovery classes the transfer engine acts on:
/// cancellation (suppressed), expired block references (descriptor refresh),
/// network/reachability failures (suspend until resumed), and everything
/// else (fatal).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BlockClientError {
    #[error("Transfer canceled")]
    Cancelled,

    #[error("Block reference expired: {0}")]
    ExpiredBlockReference(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Name already in use: {0}")]
    NameConflict(String),

    #[error("Invalid response from block storage: {0}")]
    InvalidResponse(String),

    #[error("Invalid block URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlockClientError>;

impl BlockClientError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BlockClientError::Cancelled)
    }

    pub fn is_expired_reference(&self) -> bool {
        matches!(self, BlockClientError::ExpiredBlockReference(_))
    }

    /// Connectivity and reachability failures, recoverable once the network
    /// returns.
    pub fn is_network(&self) -> bool {
        matches!(self, BlockClientError::Network(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BlockClientError::NameConflict(_))
    }
}

impl From<reqwest::Error> for BlockClientError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return status_error(status, err.to_string());
        }

        if err.is_timeout() || err.is_connect() {
            return BlockClientError::Network(err.to_string());
        }

        // Body and decode failures mean the connection dropped partway
        // through a response; treat them as reachability failures so the
        // transfer suspends and replays rather than dying.
        if err.is_body() || err.is_decode() {
            return BlockClientError::Network(err.to_string());
        }

        BlockClientError::InvalidResponse(err.to_string())
    }
}

impl From<reqwest_middleware::Error> for BlockClientError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => BlockClientError::InvalidResponse(e.to_string()),
        }
    }
}

/// Maps an HTTP error status onto the transport taxonomy. The block-storage
/// API reports an expired block URL or token as 422 Unprocessable Entity and
/// a name collision as 409 Conflict.
pub(crate) fn status_error(status: StatusCode, message: String) -> BlockClientError {
    match status {
        StatusCode::UNPROCESSABLE_ENTITY => BlockClientError::ExpiredBlockReference(message),
        StatusCode::CONFLICT => BlockClientError::NameConflict(message),
        _ => BlockClientError::Status {
            status: status.as_u16(),
            message,
        },
    }
}
