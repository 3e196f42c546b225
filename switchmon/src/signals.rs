//! Shutdown coordination for long running tasks.
//!
//! The poller sleeps for minutes at a time between polls. Every task that
//! should stop promptly on ctrl-c holds a clone of [`Shutdown`] and races its
//! waits against [`Shutdown::recv`].

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable shutdown handle. Signaling any clone wakes all of them.
#[derive(Debug, Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create a new, unsignaled `Shutdown`. Further handles should be made by
    /// cloning this one.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Wait for the shutdown signal. Returns immediately if it was already
    /// sent.
    pub async fn recv(&mut self) {
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = self.receiver.wait_for(|signaled| *signaled).await;
    }

    /// True once the signal has been sent.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Signal this and every derived handle.
    pub fn signal(&self) {
        self.sender.send_replace(true);
    }
}
