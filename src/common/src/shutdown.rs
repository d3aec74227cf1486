//! Cooperative shutdown signalling.
//!
//! Bulk operations poll a [`ShutdownSignal`] between pages and stop early
//! once shutdown has been requested. The signal is a cheap clone of a
//! `tokio::sync::watch` receiver so it can be threaded through every call.

use tokio::sync::watch;

/// Owner side: requests shutdown for every signal handed out.
#[derive(Debug)]
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn shutdown(&self) {
        // send_replace never fails, even with no live receivers
        self.sender.send_replace(true);
    }
}

/// Observer side.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_shutdown(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&mut self) {
        match self.receiver.as_mut() {
            Some(rx) => {
                // A dropped controller never requests shutdown
                if rx.wait_for(|stop| *stop).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}
