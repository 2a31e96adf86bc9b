//! Cooperative shutdown signal shared by every worker.

use tokio::sync::watch;

/// Receiver side of the shutdown flag. `true` means stop.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Create a shutdown flag, initially cleared.
pub fn channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolve once shutdown has been requested or the sender is gone.
pub async fn wait_for_shutdown(mut signal: ShutdownSignal) {
    let _ = signal.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_on_signal() {
        let (tx, rx) = channel();
        let waiter = tokio::spawn(wait_for_shutdown(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_resolves_when_sender_dropped() {
        let (tx, rx) = channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(rx))
            .await
            .unwrap();
    }
}
