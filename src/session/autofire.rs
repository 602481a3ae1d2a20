//! Autofire cadence resolution and drift tracking
//!
//! The solenoid fires one pulse per period. Hold and pause timings are pushed
//! to the device separately (`R0.0`/`R0.1`); the period is ours to keep.

use std::time::Duration;
use tokio::time::Instant;

use super::command::{bound, MAX_AUTOFIRE_MS};
use super::timers::TimerId;

/// Shortest period accepted as an explicit length (ms)
pub const MIN_AUTOFIRE_LENGTH_MS: u32 = 40;

/// Period used when neither a length nor timings were given (ms)
pub const DEFAULT_AUTOFIRE_LENGTH_MS: u32 = 70;

/// Margin taken off each half period so a pulse ends before the next starts
const PULSE_MARGIN_MS: u32 = 3;

/// Slack added on top of hold + pause when the period is derived from timings
const DERIVED_LENGTH_SLACK_MS: u32 = 6;

/// Ticks further than this from the period get logged
const DRIFT_LOG_THRESHOLD_MS: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutofireTimings {
    pub hold: u32,
    pub pause: u32,
}

impl AutofireTimings {
    pub fn bounded(hold: i32, pause: i32) -> Self {
        Self {
            hold: bound(hold, 0, MAX_AUTOFIRE_MS) as u32,
            pause: bound(pause, 0, MAX_AUTOFIRE_MS) as u32,
        }
    }
}

/// Effective settings of an armed autofire timer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutofireSettings {
    pub hold: u32,
    pub pause: u32,
    pub length: u32,
}

impl AutofireSettings {
    pub fn period(&self) -> Duration {
        Duration::from_millis(u64::from(self.length))
    }
}

/// What `start_autofire` has to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutofirePlan {
    /// Timings to push to the device first, `None` when they already match
    pub apply_timings: Option<AutofireTimings>,
    pub settings: AutofireSettings,
}

#[derive(Debug)]
struct ArmedAutofire {
    timer: TimerId,
    settings: AutofireSettings,
}

#[derive(Debug, Default)]
pub struct AutofireScheduler {
    timings: Option<AutofireTimings>,
    armed: Option<ArmedAutofire>,
    last_tick: Option<Instant>,
}

impl AutofireScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record timings that were just sent to the device
    pub fn set_timings(&mut self, timings: AutofireTimings) {
        self.timings = Some(timings);
    }

    /// Resolve a requested length into concrete settings
    ///
    /// A length of at least 40 ms splits into symmetric hold/pause timings.
    /// Anything shorter (or no length) reuses the stored timings and derives
    /// the period from them; with no timings either the default 70 ms applies.
    pub fn plan(&self, length_ms: Option<u32>) -> AutofirePlan {
        let requested = length_ms.unwrap_or(0);
        match self.timings {
            Some(timings) if requested < MIN_AUTOFIRE_LENGTH_MS => AutofirePlan {
                apply_timings: None,
                settings: AutofireSettings {
                    hold: timings.hold,
                    pause: timings.pause,
                    length: timings.hold + timings.pause + DERIVED_LENGTH_SLACK_MS,
                },
            },
            _ => {
                let length = if requested < MIN_AUTOFIRE_LENGTH_MS {
                    DEFAULT_AUTOFIRE_LENGTH_MS
                } else {
                    requested
                };
                let half = length / 2 - PULSE_MARGIN_MS;
                let derived = AutofireTimings {
                    hold: half,
                    pause: half,
                };
                AutofirePlan {
                    apply_timings: (self.timings != Some(derived)).then_some(derived),
                    settings: AutofireSettings {
                        hold: half,
                        pause: half,
                        length,
                    },
                }
            }
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn is_armed_with(&self, settings: &AutofireSettings) -> bool {
        self.armed
            .as_ref()
            .is_some_and(|armed| armed.settings == *settings)
    }

    pub fn arm(&mut self, timer: TimerId, settings: AutofireSettings, now: Instant) {
        self.armed = Some(ArmedAutofire { timer, settings });
        self.last_tick = Some(now);
    }

    /// Forget the armed timer and hand back its id for cancellation
    pub fn disarm(&mut self) -> Option<TimerId> {
        self.last_tick = None;
        self.armed.take().map(|armed| armed.timer)
    }

    /// Note a tick and return the drift in ms when it exceeds the log threshold
    pub fn observe_tick(&mut self, now: Instant) -> Option<f64> {
        let period = self.armed.as_ref()?.settings.period();
        let previous = self.last_tick.replace(now)?;
        let elapsed = now.duration_since(previous);
        let drift = elapsed.as_secs_f64() * 1000.0 - period.as_secs_f64() * 1000.0;
        (drift.abs() > DRIFT_LOG_THRESHOLD_MS).then_some(drift)
    }

    /// Back to the pre-hook state; returns the armed timer for cancellation
    pub fn reset(&mut self) -> Option<TimerId> {
        self.timings = None;
        self.disarm()
    }
}
