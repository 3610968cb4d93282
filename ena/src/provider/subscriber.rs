use tokio::sync::broadcast;

use super::WalletEvent;

/// Typed subscription for wallet notifications.
pub struct WalletSubscription {
    rx: broadcast::Receiver<WalletEvent>,
}

impl WalletSubscription {
    pub fn new(rx: broadcast::Receiver<WalletEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next notification. Returns `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<WalletEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("wallet subscription lagged by {n} events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
