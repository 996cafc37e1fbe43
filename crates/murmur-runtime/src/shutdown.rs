use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Single-transition stop flag shared by every long-lived task.
///
/// Exactly one caller wins the transition from unset to set; the flag is
/// never cleared again. Clones observe the same underlying signal.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    fired: AtomicBool,
    sender: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            inner: Arc::new(SignalInner {
                fired: AtomicBool::new(false),
                sender,
            }),
        }
    }

    /// Sets the signal. Returns true only for the call that performed the
    /// transition; every later call is a no-op.
    pub fn trigger(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.sender.send_replace(true);
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Completes once the signal is set; immediately if it already is.
    /// Cancel-safe, so serve loops can select on it freely.
    pub async fn wait(&self) {
        let mut receiver = self.inner.sender.subscribe();
        if *receiver.borrow() {
            return;
        }
        while receiver.changed().await.is_ok() {
            if *receiver.borrow() {
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
