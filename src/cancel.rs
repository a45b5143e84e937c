//! The one-shot stop signal shared by a session and its operations.
//!
//! A [`StopSignal`] is owned by the session. Every operation receives a
//! [`StopToken`] cloned from it and may either poll it between steps or
//! await [`StopToken::stopped`] alongside its own work. Triggering is
//! idempotent and never blocks.

use tokio::sync::watch;

/// The sending half of the stop signal.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    /// Create a signal that has not been triggered.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a token observing this signal.
    pub fn token(&self) -> StopToken {
        StopToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the signal. Returns `true` if this call was the first.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Whether the signal has been triggered.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing half of the stop signal.
#[derive(Debug, Clone)]
pub struct StopToken {
    rx: watch::Receiver<bool>,
}

impl StopToken {
    /// A token whose signal can never fire, for calls made outside a session.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop has been requested.
    ///
    /// If the signal is dropped without firing this never resolves.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        let fired = rx.wait_for(|stopped| *stopped).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}
