//! Rumble composition
//!
//! Several logically independent rumble intents (damage feedback, a pulsing
//! heartbeat, the hook pulse) share one motor. The mixer keeps one entry per
//! effect name and the motor always runs at the strongest of them.

use std::collections::HashMap;

use super::command::{bound, MAX_STRENGTH};

/// Effect name used by `set_rumble`
pub const MAIN_EFFECT: &str = "MAIN";

/// Effect name used for the pulse sent on hook
pub const HOOK_EFFECT: &str = "INTERNAL-HOOK";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RumbleEffect {
    pub strength: u8,
    /// Bumped on every set call, an expiry armed under an older value is stale
    pub generation: u64,
}

/// Result of storing an effect
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MixOutcome {
    pub generation: u64,
    pub mixed: u8,
}

#[derive(Debug, Default)]
pub struct EffectMixer {
    effects: HashMap<String, RumbleEffect>,
    next_generation: u64,
    last_sent: Option<u8>,
}

impl EffectMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set call that would only repeat what the motor already does
    ///
    /// Only holds when no duration-bound effect is waiting to expire and the
    /// call itself has no duration.
    pub fn is_redundant(&self, strength: i32, duration_ms: u64, pending_expiries: usize) -> bool {
        pending_expiries == 0
            && duration_ms == 0
            && self.last_sent == Some(bound(strength, 0, MAX_STRENGTH) as u8)
    }

    /// Store `strength` for `effect` under a fresh generation and remix
    pub fn apply(&mut self, effect: &str, strength: i32) -> MixOutcome {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.effects.insert(
            effect.to_string(),
            RumbleEffect {
                strength: bound(strength, 0, MAX_STRENGTH) as u8,
                generation,
            },
        );
        let mixed = self.mixed();
        self.last_sent = Some(mixed);
        MixOutcome { generation, mixed }
    }

    /// Strongest stored effect, 0 when nothing is stored
    pub fn mixed(&self) -> u8 {
        self.effects
            .values()
            .map(|effect| effect.strength)
            .max()
            .unwrap_or(0)
    }

    /// Whether `generation` is still the live one for `effect`
    pub fn is_current(&self, effect: &str, generation: u64) -> bool {
        self.effects
            .get(effect)
            .is_some_and(|stored| stored.generation == generation)
    }

    #[cfg(test)]
    pub fn effect(&self, effect: &str) -> Option<RumbleEffect> {
        self.effects.get(effect).copied()
    }

    #[cfg(test)]
    pub fn last_sent(&self) -> Option<u8> {
        self.last_sent
    }

    /// Forget every effect and the last sent strength
    ///
    /// Generations keep counting so an expiry from before the reset never
    /// matches a later effect.
    pub fn reset(&mut self) {
        self.effects.clear();
        self.last_sent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_the_strongest_effect() {
        let mut mixer = EffectMixer::new();
        assert_eq!(mixer.apply("A", 200).mixed, 200);
        assert_eq!(mixer.apply("B", 100).mixed, 200);
        assert_eq!(mixer.apply("A", 0).mixed, 100);
        assert_eq!(mixer.apply("B", 0).mixed, 0);
    }

    #[test]
    fn repeated_strength_without_duration_is_redundant() {
        let mut mixer = EffectMixer::new();
        assert!(!mixer.is_redundant(0, 0, 0), "nothing sent yet");
        mixer.apply("A", 120);
        assert!(mixer.is_redundant(120, 0, 0));
        assert!(!mixer.is_redundant(120, 50, 0));
        assert!(!mixer.is_redundant(120, 0, 1));
        assert!(!mixer.is_redundant(121, 0, 0));
    }

    #[test]
    fn a_newer_call_makes_older_generations_stale() {
        let mut mixer = EffectMixer::new();
        let first = mixer.apply("A", 255).generation;
        let second = mixer.apply("A", 128).generation;
        assert!(!mixer.is_current("A", first));
        assert!(mixer.is_current("A", second));
        assert!(!mixer.is_current("B", second));
    }

    #[test]
    fn strengths_are_bounded_before_mixing() {
        let mut mixer = EffectMixer::new();
        assert_eq!(mixer.apply("A", 999).mixed, 255);
        assert_eq!(mixer.effect("A").map(|e| e.strength), Some(255));
        assert!(mixer.is_redundant(400, 0, 0));
    }

    #[test]
    fn reset_forgets_everything() {
        let mut mixer = EffectMixer::new();
        mixer.apply("A", 90);
        mixer.reset();
        assert_eq!(mixer.mixed(), 0);
        assert_eq!(mixer.last_sent(), None);
        assert!(mixer.effect("A").is_none());
    }

    #[test]
    fn generations_survive_a_reset() {
        let mut mixer = EffectMixer::new();
        let before = mixer.apply("A", 90).generation;
        mixer.reset();
        let after = mixer.apply("A", 90).generation;
        assert!(after > before);
        assert!(!mixer.is_current("A", before));
    }
}
