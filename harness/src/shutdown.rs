//! Cooperative stop signal shared by the publish loop and the container runner.

use tokio::sync::watch;
use tracing::info;

/// Fires a [`StopSignal`].
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observed at suspension points; once fired it stays fired.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal has fired. Cancel safe.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle dropped without firing.
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// Signal wired to Ctrl-C.
pub fn stop_on_ctrl_c() -> StopSignal {
    let (handle, signal) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            handle.stop();
        }
    });
    signal
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_stop_wakes_waiters() {
        let (handle, mut signal) = stop_channel();
        let mut other = handle.signal();
        assert!(!signal.is_stopped());

        handle.stop();
        signal.stopped().await;
        other.stopped().await;
        assert!(signal.is_stopped());
        assert!(other.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_is_sticky() {
        let (handle, mut signal) = stop_channel();
        handle.stop();
        signal.stopped().await;
        // Already observed, must still resolve immediately.
        timeout(Duration::from_millis(100), signal.stopped())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_does_not_fire() {
        let mut signal = StopSignal::never();
        assert!(!signal.is_stopped());
        let result = timeout(Duration::from_secs(60), signal.stopped()).await;
        assert!(result.is_err());
    }
}
