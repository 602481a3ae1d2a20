use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LifecycleBus, LifecycleEvent};

/// Counts open device connections
///
/// With `quit_after_unhook` the tracker cancels `shutdown` once the count
/// falls back to zero after at least one connection was seen.
pub struct ConnectionTracker {
    count_rx: watch::Receiver<usize>,
    task: tokio::task::JoinHandle<()>,
}

impl ConnectionTracker {
    pub fn spawn(bus: &LifecycleBus, quit_after_unhook: bool, shutdown: CancellationToken) -> Self {
        let mut events = bus.subscribe();
        let (count_tx, count_rx) = watch::channel(0usize);

        let task = tokio::spawn(async move {
            let mut connections = 0usize;
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(LifecycleEvent::Connected { player, port, at }) => {
                        connections += 1;
                        info!(
                            "P{} connected on {} at {} ({} open)",
                            player,
                            port,
                            at.format("%H:%M:%S"),
                            connections
                        );
                    }
                    Ok(LifecycleEvent::Disconnected { player, port, at }) => {
                        let was_connected = connections > 0;
                        connections = connections.saturating_sub(1);
                        info!(
                            "P{} disconnected from {} at {} ({} open)",
                            player,
                            port,
                            at.format("%H:%M:%S"),
                            connections
                        );
                        if quit_after_unhook && was_connected && connections == 0 {
                            info!("All devices disconnected, shutting down");
                            shutdown.cancel();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Connection tracker missed {} lifecycle events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                count_tx.send_replace(connections);
            }
            debug!("Connection tracker stopped");
        });

        Self { count_rx, task }
    }

    /// Connections currently open
    pub fn connections(&self) -> usize {
        *self.count_rx.borrow()
    }

    /// Watch the count change
    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count_rx.clone()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn counts_connects_and_disconnects() {
        let bus = LifecycleBus::new();
        let token = CancellationToken::new();
        let tracker = ConnectionTracker::spawn(&bus, false, token.clone());
        let mut count = tracker.subscribe();

        bus.publish(LifecycleEvent::connected(1, "COM3"));
        bus.publish(LifecycleEvent::connected(2, "COM4"));
        assert!(timeout(Duration::from_secs(1), count.wait_for(|n| *n == 2)).await.is_ok());

        bus.publish(LifecycleEvent::disconnected(1, "COM3"));
        bus.publish(LifecycleEvent::disconnected(2, "COM4"));
        assert!(timeout(Duration::from_secs(1), count.wait_for(|n| *n == 0)).await.is_ok());
        assert!(!token.is_cancelled());
        assert_eq!(tracker.connections(), 0);
    }

    #[tokio::test]
    async fn last_disconnect_cancels_shutdown_when_quitting() {
        let bus = LifecycleBus::new();
        let token = CancellationToken::new();
        let _tracker = ConnectionTracker::spawn(&bus, true, token.clone());

        bus.publish(LifecycleEvent::connected(1, "COM3"));
        bus.publish(LifecycleEvent::disconnected(1, "COM3"));

        assert!(timeout(Duration::from_secs(1), token.cancelled()).await.is_ok());
    }

    #[tokio::test]
    async fn stray_disconnect_never_goes_negative_or_quits() {
        let bus = LifecycleBus::new();
        let token = CancellationToken::new();
        let tracker = ConnectionTracker::spawn(&bus, true, token.clone());
        let mut count = tracker.subscribe();

        bus.publish(LifecycleEvent::disconnected(1, "COM3"));
        bus.publish(LifecycleEvent::connected(1, "COM3"));
        assert!(timeout(Duration::from_secs(1), count.wait_for(|n| *n == 1)).await.is_ok());
        assert!(!token.is_cancelled());
    }
}
