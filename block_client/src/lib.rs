mod error;
pub mod http_client;
mod interface;
pub mod remote_fetcher;
pub mod retry_wrapper;
mod types;

pub use error::{BlockClientError, Result};
pub use http_client::build_http_client;
pub use interface::{
    BlockFetcher, BlockSource, ByteStream, ManifestSigner, UploadDestination,
};
pub use remote_fetcher::RemoteBlockFetcher;
pub use retry_wrapper::RetryWrapper;
pub use types::{
    BlockInfo, BlockPage, BlockPagination, BlockToken, DraftRevision, SignedManifest, TransferMeta,
};
