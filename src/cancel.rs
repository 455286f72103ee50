//! A cooperative cancellation signal shared between a caller and the long
//! running operations (retry sleeps, the authorize server) that need to
//! abort partway through.

use tokio::sync::watch;

#[derive(Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

/// A fresh, not-yet-cancelled signal and the handle used to trip it.
pub fn cancellation_pair() -> (CancellationHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle { tx }, Cancellation { rx })
}

impl CancellationHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Safe to call from multiple clones
    /// concurrently.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|v| *v).await;
    }

    /// A signal that never fires, for callers with no cancellation source.
    pub fn never() -> Self {
        cancellation_pair().1
    }
}
