use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::{Result, TransferError};

/// Abstract writable byte destination for a download.
///
/// `write` is async and must be awaited for backpressure. After `close` or
/// `abort` no further calls are made. The engine guarantees chunks arrive
/// in strict block-index order and that no byte is written twice.
#[async_trait::async_trait]
pub trait Sink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
    async fn abort(&mut self, reason: &TransferError) -> Result<()>;
}

/// Items flowing through a [`ChannelSink`] pipe.
#[derive(Debug, Clone)]
pub enum SinkChunk {
    Data(Bytes),
    Aborted(TransferError),
}

/// A sink that forwards chunks into a bounded channel, making the download
/// consumable as a stream while it is still being produced. Dropping the
/// sender on close signals end-of-stream; an abort is delivered in-band so
/// the consumer observes a clean abort rather than silent truncation.
pub struct ChannelSink {
    tx: Option<mpsc::Sender<SinkChunk>>,
}

impl ChannelSink {
    /// Returns the sink and the receiving half, buffering at most `depth`
    /// chunks before writes backpressure.
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<SinkChunk>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    fn sender(&self) -> Result<&mpsc::Sender<SinkChunk>> {
        self.tx
            .as_ref()
            .ok_or_else(|| TransferError::Sink("write after close".to_string()))
    }
}

#[async_trait::async_trait]
impl Sink for ChannelSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.sender()?
            .send(SinkChunk::Data(chunk))
            .await
            .map_err(|_| TransferError::Sink("consumer dropped".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx.take();
        Ok(())
    }

    async fn abort(&mut self, reason: &TransferError) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SinkChunk::Aborted(reason.clone())).await;
        }
        Ok(())
    }
}

/// In-memory sink collecting all bytes; the shared handle exposes the
/// final buffer and whether the sink was aborted. Used by tests and by the
/// preloaded fast path in callers that want the whole file at once.
pub struct BufferSink {
    state: Arc<Mutex<BufferSinkState>>,
}

#[derive(Default)]
pub struct BufferSinkState {
    pub data: Vec<u8>,
    pub closed: bool,
    pub aborted: Option<TransferError>,
}

impl BufferSink {
    pub fn new() -> (Self, Arc<Mutex<BufferSinkState>>) {
        let state = Arc::new(Mutex::new(BufferSinkState::default()));
        (Self { state: state.clone() }, state)
    }
}

#[async_trait::async_trait]
impl Sink for BufferSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed || state.aborted.is_some() {
            return Err(TransferError::Sink("write after close".to_string()));
        }
        state.data.extend_from_slice(&chunk);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }

    async fn abort(&mut self, reason: &TransferError) -> Result<()> {
        self.state.lock().unwrap().aborted = Some(reason.clone());
        Ok(())
    }
}
