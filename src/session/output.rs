use super::effect_mixer::MAIN_EFFECT;
use super::state::HookInfo;

/// Dispatch flags attached to a command
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Priority {
    /// Skip the artificial latency
    pub instantaneous: bool,
    /// Still send (or queue) while disconnected
    pub important: bool,
}

impl Priority {
    pub const ROUTINE: Priority = Priority {
        instantaneous: false,
        important: false,
    };

    pub const URGENT: Priority = Priority {
        instantaneous: true,
        important: true,
    };

    /// Flags a delayed command is replayed with; importance does not survive the delay
    pub const DEFERRED: Priority = Priority {
        instantaneous: true,
        important: false,
    };

    /// Configuration commands: delayed like everything else but never dropped
    pub const CONFIGURATION: Priority = Priority {
        instantaneous: false,
        important: true,
    };
}

/// Feedback operations a plugin or callback drives a device with
///
/// Implemented by the session itself (used inside lifecycle callbacks) and
/// by [`SessionHandle`](super::SessionHandle) for everyone else.
pub trait FeedbackOutput {
    fn send_action(&mut self, command: &str, priority: Priority);

    /// `F0.1.<pulses>`
    fn fire_recoil(&mut self, pulses: i32);

    /// Set one named rumble intent; `duration_ms == 0` holds until changed
    fn set_rumble_effect(&mut self, effect: &str, strength: i32, duration_ms: u64, priority: Priority);

    fn start_rumble_pulsing_effect(&mut self, effect: &str, strength: i32, on_ms: u64, off_ms: u64);

    fn stop_rumble_pulsing_effect(&mut self, effect: &str);

    fn set_autofire_timings(&mut self, hold_ms: i32, pause_ms: i32);

    /// Start autofire, `None` keeps the current timings (or the default cadence)
    fn start_autofire(&mut self, length_ms: Option<u32>);

    fn stop_autofire(&mut self);

    /// Legacy single-effect rumble
    fn set_rumble(&mut self, strength: i32, duration_ms: u64) {
        self.set_rumble_effect(MAIN_EFFECT, strength, duration_ms, Priority::ROUTINE);
    }
}

/// Single-slot hook run on connect or before disconnect
///
/// Runs inside the session task; it must not block.
pub type LifecycleCallback = Box<dyn FnMut(&mut dyn FeedbackOutput, &HookInfo) + Send>;
