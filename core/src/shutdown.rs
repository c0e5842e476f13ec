//! Cooperative cancellation shared by the consumer loop, retry delays and
//! handlers.
//!
//! A [`ShutdownTrigger`] flips a `watch` channel once; every cloned
//! [`ShutdownSignal`] observes it. Components check the signal at their
//! suspension points (poll, retry delay, publish) and never in the middle of
//! non-cancellable work.
//!
//! ```
//! use eventline_core::shutdown::shutdown_channel;
//!
//! # async fn example() {
//! let (trigger, signal) = shutdown_channel();
//! let worker = tokio::spawn(async move {
//!     signal.cancelled().await;
//! });
//!
//! trigger.trigger();
//! worker.await.ok();
//! # }
//! ```

use tokio::sync::watch;

/// Create a connected trigger/signal pair.
#[must_use]
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Sending half: requests shutdown.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Create another signal observing this trigger.
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half: observes a shutdown request.
///
/// Dropping the trigger without firing it leaves the signal untriggered
/// forever.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, signal) = shutdown_channel();
        signal
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested.
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` arm.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let observed = rx.wait_for(|triggered| *triggered).await.map(|_| ());
        if observed.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
