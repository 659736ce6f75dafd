use std::future::Future;

use tokio::sync::watch;

use crate::ProviderError;

/// Fires a [`Cancel`]. Dropping the handle without firing leaves the signal quiet forever.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Cancellation signal threaded through every provider call and wait of a run.
#[derive(Clone, Debug)]
pub struct Cancel {
    rx: watch::Receiver<bool>,
}

/// Creates a connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, Cancel) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancel { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Cancel {
    /// A signal that never fires.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone without firing.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Races `fut` against the signal. Cancellation wins ties.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ProviderError::Cancelled),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn guard_returns_cancelled_once_fired() {
        let (handle, cancel) = cancel_pair();
        handle.cancel();
        let res: Result<(), _> = cancel
            .guard(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(ProviderError::Cancelled)));
    }

    #[tokio::test]
    async fn never_lets_work_finish() {
        let cancel = Cancel::never();
        assert!(!cancel.is_cancelled());
        let res = cancel.guard(async { Ok::<_, ProviderError>(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn fired_from_another_task() {
        let (handle, cancel) = cancel_pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        cancel.cancelled().await;
        assert!(cancel.is_cancelled());
    }
}
