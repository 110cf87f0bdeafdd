use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::{StoreError, StoreResult};
use crate::pending::CompletionHandle;

/// Outcome of one asynchronous write: bytes written, or the backend error.
pub type WriteOutcome = StoreResult<u64>;

/// Caller-side token for an asynchronous write.
///
/// Await it with [`wait`](Self::wait) or poll it with
/// [`try_result`](Self::try_result). Neither resolves the matching entry on
/// the object; that stays with the caller.
#[derive(Debug)]
pub struct Completion {
    handle: CompletionHandle,
    rx: oneshot::Receiver<WriteOutcome>,
}

/// Backend-side half of a [`Completion`].
#[derive(Debug)]
pub struct CompletionSender {
    handle: CompletionHandle,
    tx: oneshot::Sender<WriteOutcome>,
}

impl Completion {
    /// Create a linked sender/token pair for `handle`.
    pub fn channel(handle: CompletionHandle) -> (CompletionSender, Completion) {
        let (tx, rx) = oneshot::channel();
        (CompletionSender { handle, tx }, Completion { handle, rx })
    }

    pub fn handle(&self) -> CompletionHandle {
        self.handle
    }

    /// Wait for the backend to report.
    pub async fn wait(self) -> WriteOutcome {
        let handle = self.handle;
        self.rx
            .await
            .unwrap_or(Err(StoreError::Abandoned(handle)))
    }

    /// Non-blocking poll. `None` while the write is still in flight.
    pub fn try_result(&mut self) -> Option<WriteOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(StoreError::Abandoned(self.handle))),
        }
    }
}

impl CompletionSender {
    pub fn handle(&self) -> CompletionHandle {
        self.handle
    }

    /// Report the outcome. A token that was already dropped is ignored.
    pub fn complete(self, outcome: WriteOutcome) {
        let _ = self.tx.send(outcome);
    }
}
