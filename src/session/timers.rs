//! Owned, cancellable timers for a device session
//!
//! Each armed timer is a small tokio task that posts its id back into the
//! session loop. The registry is the source of truth: an id that is no longer
//! registered when it arrives was cancelled and is dropped.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::debug;

pub type TimerId = u64;

/// What the session does when a timer fires
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Replay a delayed command
    DeferredCommand(String),
    /// Retire a duration-bound rumble effect unless it was superseded
    RumbleExpiry {
        effect: String,
        generation: u64,
        instantaneous: bool,
        important: bool,
    },
    /// Refresh a pulsing rumble effect
    RumblePulse {
        effect: String,
        strength: i32,
        on_ms: u64,
    },
    /// Fire one autofire recoil pulse
    Autofire,
    /// Close the link after unhook
    GraceClose,
}

#[derive(Debug)]
struct ArmedTimer {
    kind: TimerKind,
    periodic: bool,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
pub struct TimerRegistry {
    next_id: TimerId,
    armed: HashMap<TimerId, ArmedTimer>,
    fired_tx: mpsc::UnboundedSender<TimerId>,
}

impl TimerRegistry {
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerId>) -> Self {
        Self {
            next_id: 0,
            armed: HashMap::new(),
            fired_tx,
        }
    }

    /// Fire once after `delay`
    pub fn arm_once(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        let id = self.allocate();
        let fired_tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if fired_tx.send(id).is_err() {
                debug!("Timer {} fired after its session stopped", id);
            }
        });
        debug!("Armed one-shot timer {} in {:?}: {:?}", id, delay, kind);
        self.armed.insert(
            id,
            ArmedTimer {
                kind,
                periodic: false,
                handle,
            },
        );
        id
    }

    /// Fire every `period`, first tick one period from now
    ///
    /// `period` must be non-zero.
    pub fn arm_every(&mut self, period: Duration, kind: TimerKind) -> TimerId {
        let id = self.allocate();
        let fired_tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if fired_tx.send(id).is_err() {
                    debug!("Timer {} stopped with its session", id);
                    break;
                }
            }
        });
        debug!("Armed periodic timer {} every {:?}: {:?}", id, period, kind);
        self.armed.insert(
            id,
            ArmedTimer {
                kind,
                periodic: true,
                handle,
            },
        );
        id
    }

    /// Resolve a fired id into its action
    ///
    /// One-shot timers are unregistered here, periodic ones stay armed.
    /// Returns `None` for ids that were cancelled in the meantime.
    pub fn fire(&mut self, id: TimerId) -> Option<TimerKind> {
        match self.armed.get(&id) {
            Some(timer) if timer.periodic => Some(timer.kind.clone()),
            Some(_) => self.armed.remove(&id).map(|timer| timer.kind),
            None => None,
        }
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.armed.remove(&id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every listed timer, returns how many were still armed
    pub fn cancel_many(&mut self, ids: &[TimerId]) -> usize {
        ids.iter().filter(|id| self.cancel(**id)).count()
    }

    /// Cancel every timer whose action matches `predicate`
    pub fn cancel_where(&mut self, predicate: impl Fn(&TimerKind) -> bool) -> usize {
        let ids: Vec<TimerId> = self
            .armed
            .iter()
            .filter(|(_, timer)| predicate(&timer.kind))
            .map(|(id, _)| *id)
            .collect();
        self.cancel_many(&ids)
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.armed.len();
        for (_, timer) in self.armed.drain() {
            timer.handle.abort();
        }
        count
    }

    pub fn ids(&self) -> Vec<TimerId> {
        self.armed.keys().copied().collect()
    }

    /// Number of armed timers matching `predicate`
    pub fn count(&self, predicate: impl Fn(&TimerKind) -> bool) -> usize {
        self.armed
            .values()
            .filter(|timer| predicate(&timer.kind))
            .count()
    }

    pub fn find(&self, predicate: impl Fn(&TimerKind) -> bool) -> Option<TimerId> {
        self.armed
            .iter()
            .find(|(_, timer)| predicate(&timer.kind))
            .map(|(id, _)| *id)
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    fn allocate(&mut self) -> TimerId {
        self.next_id += 1;
        self.next_id
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_and_unregisters() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        let id = timers.arm_once(Duration::from_millis(50), TimerKind::GraceClose);

        sleep(Duration::from_millis(49)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(id));
        assert_eq!(timers.fire(id), Some(TimerKind::GraceClose));
        assert_eq!(timers.fire(id), None);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_timer_keeps_firing_until_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        let id = timers.arm_every(Duration::from_millis(20), TimerKind::Autofire);

        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(id));
            assert_eq!(timers.fire(id), Some(TimerKind::Autofire));
        }

        assert!(timers.cancel(id));
        sleep(Duration::from_millis(100)).await;
        while let Ok(late) = rx.try_recv() {
            assert_eq!(timers.fire(late), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timers_never_resolve() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        let keep = timers.arm_once(Duration::from_millis(30), TimerKind::GraceClose);
        let drop_me = timers.arm_once(
            Duration::from_millis(10),
            TimerKind::DeferredCommand("F0.1.1".to_string()),
        );

        assert_eq!(timers.cancel_many(&[drop_me]), 1);
        assert_eq!(rx.recv().await, Some(keep));
        assert_eq!(timers.count(|kind| matches!(kind, TimerKind::GraceClose)), 1);
        assert_eq!(timers.cancel_all(), 1);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_where_only_touches_matching_timers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        timers.arm_every(Duration::from_millis(20), TimerKind::Autofire);
        timers.arm_once(
            Duration::from_millis(10),
            TimerKind::DeferredCommand("E".to_string()),
        );

        assert_eq!(timers.cancel_where(|kind| *kind == TimerKind::Autofire), 1);
        assert_eq!(timers.count(|_| true), 1);
        assert!(timers.find(|kind| matches!(kind, TimerKind::DeferredCommand(_))).is_some());
    }
}
