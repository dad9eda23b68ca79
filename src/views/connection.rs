use std::time::Duration;

use tokio::sync::watch;

use crate::realtime::{EventBus, EventKind, Subscription};

/// Connected/disconnected indicator.
pub struct ConnectionWatch {
    rx: watch::Receiver<bool>,
    _subscription: Subscription,
}

impl ConnectionWatch {
    pub fn new(bus: &EventBus) -> Self {
        let (tx, rx) = watch::channel(bus.is_connected());
        let subscription = bus.listen_all(
            [EventKind::Connected, EventKind::Disconnect],
            move |event| {
                tx.send_replace(event.kind() == &EventKind::Connected);
            },
        );

        Self {
            rx,
            _subscription: subscription,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.rx.borrow()
    }

    /// Follow changes as they happen.
    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// True once connected, false if `limit` passes first.
    pub async fn wait_connected(&self, limit: Duration) -> bool {
        let mut rx = self.rx.clone();
        // The `Ref` held by the result must drop before `rx` does
        let reached = matches!(
            tokio::time::timeout(limit, rx.wait_for(|connected| *connected)).await,
            Ok(Ok(_))
        );
        reached
    }
}
