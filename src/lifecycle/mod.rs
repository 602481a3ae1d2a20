//! Process-wide connection notifications
//!
//! Sessions publish when a physical link comes up or goes down. The
//! application subscribes to keep an aggregate connection count and to decide
//! when to shut down.
//!
//! ```text
//! DeviceSession P1 ──┐
//! DeviceSession P2 ──┼──► LifecycleBus ──► ConnectionTracker ──► shutdown token
//! DeviceSession Pn ──┘        (broadcast)
//! ```

pub mod tracker;

use chrono::{DateTime, Local};
use tokio::sync::broadcast;
use tracing::trace;

pub use tracker::ConnectionTracker;

const BUS_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected {
        player: u8,
        port: String,
        at: DateTime<Local>,
    },
    Disconnected {
        player: u8,
        port: String,
        at: DateTime<Local>,
    },
}

impl LifecycleEvent {
    pub fn connected(player: u8, port: &str) -> Self {
        LifecycleEvent::Connected {
            player,
            port: port.to_string(),
            at: Local::now(),
        }
    }

    pub fn disconnected(player: u8, port: &str) -> Self {
        LifecycleEvent::Disconnected {
            player,
            port: port.to_string(),
            at: Local::now(),
        }
    }

    #[cfg(test)]
    pub fn player(&self) -> u8 {
        match self {
            LifecycleEvent::Connected { player, .. } | LifecycleEvent::Disconnected { player, .. } => *player,
        }
    }
}

/// Typed broadcast channel for [`LifecycleEvent`]s
#[derive(Clone, Debug)]
pub struct LifecycleBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget, nobody listening is fine
    pub fn publish(&self, event: LifecycleEvent) {
        if let Err(e) = self.tx.send(event) {
            trace!("No lifecycle subscribers for {:?}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = LifecycleBus::new();
        let mut rx = bus.subscribe();

        bus.publish(LifecycleEvent::connected(1, "COM3"));
        bus.publish(LifecycleEvent::disconnected(1, "COM3"));

        let first = rx.recv().await.ok();
        assert!(matches!(first, Some(LifecycleEvent::Connected { player: 1, ref port, .. }) if port == "COM3"));
        let second = rx.recv().await.ok();
        assert!(matches!(second, Some(LifecycleEvent::Disconnected { player: 1, .. })));
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = LifecycleBus::new();
        bus.publish(LifecycleEvent::connected(2, "COM4"));
        assert_eq!(LifecycleEvent::disconnected(2, "COM4").player(), 2);
    }
}
