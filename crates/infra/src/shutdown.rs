//! Stop-signal plumbing shared by long-running loops.

use tokio::sync::watch;

/// Create a stop channel. Sending `true` (or dropping the sender) stops receivers.
pub fn stop_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once a stop has been requested or the sender is gone.
pub async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_on_signal() {
        let (tx, mut rx) = stop_channel();
        let waiter = tokio::spawn(async move { wait_for_stop(&mut rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn resolves_when_sender_dropped() {
        let (tx, mut rx) = stop_channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_stop(&mut rx))
            .await
            .unwrap();
    }
}
