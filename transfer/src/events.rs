use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::errors::TransferError;
use crate::model::TransferId;

/// Lifecycle notifications for one transfer, delivered over a per-transfer
/// channel so ordering and cancellation flow through typed control flow
/// rather than callback closures.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// The output sink is open; for downloads the consumer may start
    /// reading before all blocks are known.
    Started,
    /// Bytes observed on the network. Negative deltas are reverts: bytes
    /// attributed to a buffered-but-unflushed block whose fetch is being
    /// retried. Net cumulative progress never overstates bytes durably
    /// flushed for longer than one retry cycle.
    Progress { delta: i64 },
    /// A connectivity failure suspended the transfer; it resumes
    /// automatically once `resume()` is called.
    NetworkInterrupted { id: TransferId, error: TransferError },
    Finished,
    Failed { error: TransferError },
}

/// Sending half of a transfer's event channel. Sends never fail: a dropped
/// receiver just means nobody is listening anymore.
#[derive(Clone)]
pub struct EventSender {
    tx: UnboundedSender<TransferEvent>,
}

impl EventSender {
    pub fn send(&self, event: TransferEvent) {
        let _ = self.tx.send(event);
    }

    pub fn progress(&self, delta: i64) {
        if delta != 0 {
            self.send(TransferEvent::Progress { delta });
        }
    }
}

pub fn event_channel() -> (EventSender, UnboundedReceiver<TransferEvent>) {
    let (tx, rx) = unbounded_channel();
    (EventSender { tx }, rx)
}
