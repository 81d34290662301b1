use std::fmt;
use std::sync::Mutex;
use std::time::SystemTime;

use block_client::TransferMeta;
use ulid::Ulid;

use crate::errors::TransferError;

/// Opaque unique id for a transfer, assigned at creation and stable for the
/// transfer's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(String);

impl TransferId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State machine for a transfer.
///
/// Forward path is `Pending → Initializing → Progress → Finalizing → Done`;
/// `Paused`, `Conflict`, `Canceled`, and `Error` branch off at intervening
/// points. `Conflict` is upload-only and suspends rather than fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Initializing,
    Conflict,
    Progress,
    Finalizing,
    Paused,
    Done,
    Canceled,
    Error,
}

/// Book-keeping shared by both engines: id, metadata, state, start
/// timestamp, last error, and the state to restore once a pause ends.
/// Owned by the engine that created it and removed from tracking only when
/// the consumer explicitly discards it.
pub(crate) struct TransferRecord {
    pub id: TransferId,
    pub meta: TransferMeta,
    pub started_at: SystemTime,
    state: Mutex<StateCell>,
}

struct StateCell {
    current: TransferState,
    resume_to: Option<TransferState>,
    last_error: Option<TransferError>,
}

impl TransferRecord {
    pub fn new(meta: TransferMeta) -> Self {
        Self {
            id: TransferId::new(),
            meta,
            started_at: SystemTime::now(),
            state: Mutex::new(StateCell {
                current: TransferState::Pending,
                resume_to: None,
                last_error: None,
            }),
        }
    }

    pub fn state(&self) -> TransferState {
        self.state.lock().unwrap().current
    }

    pub fn set_state(&self, state: TransferState) {
        self.state.lock().unwrap().current = state;
    }

    pub fn last_error(&self) -> Option<TransferError> {
        self.state.lock().unwrap().last_error.clone()
    }

    pub fn set_error(&self, err: TransferError) {
        let mut cell = self.state.lock().unwrap();
        cell.last_error = Some(err);
        cell.current = TransferState::Error;
    }

    /// Enter `Paused`, remembering the state to restore on resume. A
    /// no-op on transfers that already reached a terminal state.
    pub fn enter_paused(&self) {
        let mut cell = self.state.lock().unwrap();
        let terminal = matches!(
            cell.current,
            TransferState::Done | TransferState::Canceled | TransferState::Error
        );
        if cell.current != TransferState::Paused && !terminal {
            cell.resume_to = Some(cell.current);
            cell.current = TransferState::Paused;
        }
    }

    /// Leave `Paused`, restoring the remembered state (`Progress` rather
    /// than `Pending`, so position is preserved across a pause).
    pub fn leave_paused(&self) {
        let mut cell = self.state.lock().unwrap();
        if cell.current == TransferState::Paused {
            cell.current = cell.resume_to.take().unwrap_or(TransferState::Progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> TransferMeta {
        TransferMeta {
            name: "file.bin".into(),
            mime_type: "application/octet-stream".into(),
            size: Some(8),
        }
    }

    #[test]
    fn test_pause_restores_previous_state() {
        let record = TransferRecord::new(meta());
        record.set_state(TransferState::Progress);

        record.enter_paused();
        assert_eq!(record.state(), TransferState::Paused);

        record.leave_paused();
        assert_eq!(record.state(), TransferState::Progress);
    }

    #[test]
    fn test_double_pause_keeps_resume_target() {
        let record = TransferRecord::new(meta());
        record.set_state(TransferState::Progress);

        record.enter_paused();
        record.enter_paused();
        record.leave_paused();
        assert_eq!(record.state(), TransferState::Progress);
    }

    #[test]
    fn test_error_records_last_error() {
        let record = TransferRecord::new(meta());
        record.set_error(TransferError::Internal("boom".into()));
        assert_eq!(record.state(), TransferState::Error);
        assert!(record.last_error().is_some());
    }
}
