use tokio::sync::watch;

/// Cloneable cancellation signal shared by a run's workers.
///
/// Cancellation is level-triggered and one-way: once cancelled, a token never
/// resets. Workers observe it at batch boundaries and inside limiter waits,
/// finish the call already in flight, then stop pulling work.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    pub fn cancel(&self) {
        // Receivers are cloned from `self.rx`, so the channel can't be closed.
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled; pending indefinitely otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
