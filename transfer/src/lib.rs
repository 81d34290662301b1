mod control;
mod download;
mod errors;
mod events;
mod model;
mod progress;
mod reorder_buffer;
mod sink;
mod transform;
pub mod upload;

pub use download::DownloadEngine;
pub use errors::{Result, TransferError};
pub use events::{EventSender, TransferEvent, event_channel};
pub use model::{TransferId, TransferState};
pub use progress::ProgressTracker;
pub use reorder_buffer::ReorderBuffer;
pub use sink::{BufferSink, BufferSinkState, ChannelSink, Sink, SinkChunk};
pub use transform::{ContentTransform, EncryptedBlock};
pub use upload::{
    ConflictChoice, ConflictDecision, ConflictPrompt, ConflictResolver, UploadEngine, UploadQueue,
    disambiguated_name,
};

// The wire-level model lives in `block_client`; re-export the pieces that
// form the transfer data model.
pub use block_client::{BlockInfo, BlockPage, BlockPagination, BlockToken, TransferMeta};
