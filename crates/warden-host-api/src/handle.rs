//! Foreground subscription handle

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::HostSignal;

/// Receiving end of the host's push channel
///
/// Dropping or cancelling the subscription tells the producer to stop; the
/// enforcement loop creates a fresh one on every start.
#[derive(Debug)]
pub struct ForegroundSubscription {
    rx: mpsc::UnboundedReceiver<HostSignal>,
    cancel: CancellationToken,
    /// Held only by idle subscriptions so `recv` pends instead of ending
    keepalive: Option<mpsc::UnboundedSender<HostSignal>>,
}

/// Producing end held by the host adapter
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<HostSignal>,
    cancel: CancellationToken,
}

impl ForegroundSubscription {
    /// Create a connected sender/subscription pair
    pub fn channel() -> (SignalSender, ForegroundSubscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        (
            SignalSender {
                tx,
                cancel: cancel.clone(),
            },
            ForegroundSubscription {
                rx,
                cancel,
                keepalive: None,
            },
        )
    }

    /// A subscription that never yields (host without a push channel)
    pub fn idle() -> Self {
        let (sender, mut subscription) = Self::channel();
        subscription.keepalive = Some(sender.tx);
        subscription
    }

    /// Next signal, or None once the producer is gone
    pub async fn recv(&mut self) -> Option<HostSignal> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<HostSignal> {
        self.rx.try_recv().ok()
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.keepalive = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ForegroundSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SignalSender {
    /// Deliver a signal; returns false once the subscriber has gone away
    pub fn send(&self, signal: HostSignal) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(signal).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the subscriber cancels or is dropped
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_util::AppId;

    #[tokio::test]
    async fn signals_flow_until_cancelled() {
        let (sender, mut subscription) = ForegroundSubscription::channel();
        let at = warden_util::now();

        assert!(sender.send(HostSignal::ForegroundChanged {
            app: AppId::new("app.x"),
            at,
        }));
        assert!(matches!(
            subscription.recv().await,
            Some(HostSignal::ForegroundChanged { .. })
        ));

        subscription.cancel();
        assert!(sender.is_closed());
        assert!(!sender.send(HostSignal::ScreenOff { at }));
    }

    #[tokio::test]
    async fn dropping_subscription_closes_sender() {
        let (sender, subscription) = ForegroundSubscription::channel();
        drop(subscription);

        sender.closed().await;
        assert!(sender.is_closed());
    }

    #[test]
    fn idle_subscription_yields_nothing() {
        let mut subscription = ForegroundSubscription::idle();
        assert!(subscription.try_recv().is_none());
    }
}
