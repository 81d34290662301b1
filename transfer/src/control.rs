use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Pause/resume/cancel plumbing shared by both engines.
///
/// `cancel_root` is canceled exactly once, by `cancel()`. The fetch token
/// is a child of it, canceled by `pause()` (and by a worker pool to abort
/// siblings after a failure) and replaced with a fresh child on resume or
/// internal retry.
pub(crate) struct ControlState {
    pub cancel_root: CancellationToken,
    fetch_token: std::sync::Mutex<CancellationToken>,
    pub paused: AtomicBool,
    pub resume_notify: Notify,
}

impl ControlState {
    pub fn new() -> Self {
        let cancel_root = CancellationToken::new();
        let fetch_token = std::sync::Mutex::new(cancel_root.child_token());
        Self {
            cancel_root,
            fetch_token,
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
        }
    }

    pub fn current_token(&self) -> CancellationToken {
        self.fetch_token.lock().unwrap().clone()
    }

    pub fn cancel_fetch(&self) {
        self.fetch_token.lock().unwrap().cancel();
    }

    pub fn refresh_token(&self) {
        *self.fetch_token.lock().unwrap() = self.cancel_root.child_token();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_root.is_cancelled()
    }

    /// Blocks while paused; wakes on resume or cancellation.
    pub async fn wait_if_paused(&self) -> crate::errors::Result<()> {
        loop {
            if self.is_cancelled() {
                return Err(crate::errors::TransferError::Cancelled);
            }
            let notified = self.resume_notify.notified();
            if !self.is_paused() {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel_root.cancelled() => return Err(crate::errors::TransferError::Cancelled),
                _ = notified => {},
            }
        }
    }
}
