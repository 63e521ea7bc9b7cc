//! Coalescing, payload-free trigger.
//!
//! Any number of [`Trigger::fire`] calls made while a request is already
//! pending collapse into that one request. Together with a consumer that
//! handles one request at a time this gives at most one pass in flight plus
//! one queued follow-up.

use tokio::sync::mpsc;

/// Sending half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Trigger {
    tx: mpsc::Sender<()>,
}

/// Receiving half.
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<()>,
}

/// Creates a connected trigger pair.
pub fn trigger_channel() -> (Trigger, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (Trigger { tx }, TriggerReceiver { rx })
}

impl Trigger {
    /// Requests a pass. Returns false if a request was already pending or the
    /// receiver is gone.
    pub fn fire(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

impl TriggerReceiver {
    /// Waits for the next request. Returns false when every sender is gone.
    pub async fn wait(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Consumes a pending request without waiting.
    pub fn try_take(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
