//! Connect/disconnect command overrides
//!
//! Configured command lists replace per-game scripting: on connect and before
//! disconnect a session sends the generic list first, then the list for the
//! hooked game.

use std::sync::Arc;
use tracing::debug;

use crate::config::OverrideConfig;
use crate::session::{FeedbackOutput, HookInfo, LifecycleCallback, Priority};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Connected,
    Disconnecting,
}

/// Shared, read-only override table handed out as session callbacks
#[derive(Clone, Debug, Default)]
pub struct CommandOverrides {
    config: Arc<OverrideConfig>,
}

impl CommandOverrides {
    pub fn new(config: OverrideConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Commands for `phase`, generic ones first
    pub fn commands(&self, phase: Phase, key: Option<&str>) -> Vec<&str> {
        let game = key.and_then(|key| self.config.games.get(key));
        let (generic, specific) = match phase {
            Phase::Connected => (&self.config.connected, game.map(|g| &g.connected)),
            Phase::Disconnecting => (&self.config.disconnecting, game.map(|g| &g.disconnecting)),
        };
        generic
            .iter()
            .chain(specific.into_iter().flatten())
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.config.connected.is_empty()
            && self.config.disconnecting.is_empty()
            && self.config.games.is_empty()
    }

    pub fn callback(&self, phase: Phase) -> LifecycleCallback {
        let overrides = self.clone();
        Box::new(move |output: &mut dyn FeedbackOutput, info: &HookInfo| {
            overrides.apply(phase, output, info)
        })
    }

    fn apply(&self, phase: Phase, output: &mut dyn FeedbackOutput, info: &HookInfo) {
        let commands = self.commands(phase, info.key.as_deref());
        if commands.is_empty() {
            return;
        }
        debug!(
            "P{} {:?} overrides for {}: {}",
            info.player,
            phase,
            info.key.as_deref().unwrap_or("-"),
            commands.join(", ")
        );
        for command in commands {
            output.send_action(command, Priority::ROUTINE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameOverrides;
    use crate::session::ConnectionState;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Sent(Vec<String>);

    impl FeedbackOutput for Sent {
        fn send_action(&mut self, command: &str, _priority: Priority) {
            self.0.push(command.to_string());
        }
        fn fire_recoil(&mut self, _pulses: i32) {}
        fn set_rumble_effect(&mut self, _: &str, _: i32, _: u64, _: Priority) {}
        fn start_rumble_pulsing_effect(&mut self, _: &str, _: i32, _: u64, _: u64) {}
        fn stop_rumble_pulsing_effect(&mut self, _: &str) {}
        fn set_autofire_timings(&mut self, _: i32, _: i32) {}
        fn start_autofire(&mut self, _: Option<u32>) {}
        fn stop_autofire(&mut self) {}
    }

    fn overrides() -> CommandOverrides {
        CommandOverrides::new(OverrideConfig {
            connected: vec!["S6".to_string()],
            disconnecting: vec!["E".to_string()],
            games: HashMap::from([(
                "ptblank".to_string(),
                GameOverrides {
                    connected: vec!["S0&o2.43&".to_string(), "S1".to_string()],
                    disconnecting: vec![],
                },
            )]),
        })
    }

    fn info(key: Option<&str>) -> HookInfo {
        HookInfo {
            key: key.map(str::to_string),
            player: 1,
            port: "COM3".to_string(),
            state: ConnectionState::Connected,
        }
    }

    #[test]
    fn generic_commands_come_before_game_commands() {
        let overrides = overrides();
        assert_eq!(
            overrides.commands(Phase::Connected, Some("ptblank")),
            ["S6", "S0&o2.43&", "S1"]
        );
        assert_eq!(overrides.commands(Phase::Connected, Some("other")), ["S6"]);
        assert_eq!(overrides.commands(Phase::Disconnecting, Some("ptblank")), ["E"]);
    }

    #[test]
    fn callback_sends_through_the_session_output() {
        let overrides = overrides();
        let mut callback = overrides.callback(Phase::Connected);
        let mut sent = Sent::default();

        callback(&mut sent, &info(Some("ptblank")));
        assert_eq!(sent.0, ["S6", "S0&o2.43&", "S1"]);

        let mut sent = Sent::default();
        callback(&mut sent, &info(None));
        assert_eq!(sent.0, ["S6"]);
    }

    #[test]
    fn empty_table_sends_nothing() {
        let overrides = CommandOverrides::default();
        assert!(overrides.is_empty());
        let mut sent = Sent::default();
        overrides.callback(Phase::Disconnecting)(&mut sent, &info(Some("ptblank")));
        assert!(sent.0.is_empty());
    }
}
