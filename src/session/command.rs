//! Wire grammar for GUN4IR-style feedback devices
//!
//! Every command is a short ASCII string sent as one discrete write. The
//! grammar is fixed; nothing is negotiated with the device.

use std::fmt;

/// Highest value accepted for a recoil pulse count or rumble strength
pub const MAX_STRENGTH: i32 = 255;

/// Highest autofire hold or pause duration the firmware accepts (ms)
pub const MAX_AUTOFIRE_MS: i32 = 9999;

/// Clamp `value` into `[min, max]`
pub fn bound(value: i32, min: i32, max: i32) -> i32 {
    value.max(min).min(max)
}

/// One command in the device's wire grammar
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `S6`: take over all feedback output
    TakeOver,
    /// `E`: hand feedback back to the device's automatic behaviour
    RestoreDefault,
    /// `F0.1.<n>`: fire `n` recoil pulses
    Recoil(u8),
    /// `F1.<flag>.<n>`: set rumble strength, flag is 1 for any non-zero strength
    Rumble(u8),
    /// `R0.0.<ms>`: autofire solenoid hold
    AutofireHold(u16),
    /// `R0.1.<ms>`: autofire pause between pulses
    AutofirePause(u16),
    /// Caller-supplied command passed through untouched
    Raw(String),
}

impl Command {
    /// `F1.0.0`
    pub fn rumble_off() -> Self {
        Command::Rumble(0)
    }

    pub fn recoil(pulses: i32) -> Self {
        Command::Recoil(bound(pulses, 0, MAX_STRENGTH) as u8)
    }

    pub fn rumble(strength: i32) -> Self {
        Command::Rumble(bound(strength, 0, MAX_STRENGTH) as u8)
    }

    pub fn autofire_hold(ms: i32) -> Self {
        Command::AutofireHold(bound(ms, 0, MAX_AUTOFIRE_MS) as u16)
    }

    pub fn autofire_pause(ms: i32) -> Self {
        Command::AutofirePause(bound(ms, 0, MAX_AUTOFIRE_MS) as u16)
    }

    /// Render the exact bytes that go on the wire
    pub fn into_wire(self) -> String {
        match self {
            Command::Raw(raw) => raw,
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::TakeOver => write!(f, "S6"),
            Command::RestoreDefault => write!(f, "E"),
            Command::Recoil(pulses) => write!(f, "F0.1.{}", pulses),
            Command::Rumble(strength) => {
                write!(f, "F1.{}.{}", u8::from(*strength > 0), strength)
            }
            Command::AutofireHold(ms) => write!(f, "R0.0.{}", ms),
            Command::AutofirePause(ms) => write!(f, "R0.1.{}", ms),
            Command::Raw(raw) => write!(f, "{}", raw),
        }
    }
}

impl From<&str> for Command {
    fn from(raw: &str) -> Self {
        Command::Raw(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fixed_commands() {
        assert_eq!(Command::TakeOver.into_wire(), "S6");
        assert_eq!(Command::RestoreDefault.into_wire(), "E");
        assert_eq!(Command::rumble_off().into_wire(), "F1.0.0");
    }

    #[test]
    fn rumble_flag_follows_strength() {
        assert_eq!(Command::rumble(200).into_wire(), "F1.1.200");
        assert_eq!(Command::rumble(1).into_wire(), "F1.1.1");
        assert_eq!(Command::rumble(0).into_wire(), "F1.0.0");
    }

    #[test]
    fn out_of_range_values_are_bounded() {
        assert_eq!(Command::recoil(-4).into_wire(), "F0.1.0");
        assert_eq!(Command::recoil(300).into_wire(), "F0.1.255");
        assert_eq!(Command::rumble(1000).into_wire(), "F1.1.255");
        assert_eq!(Command::autofire_hold(12_000).into_wire(), "R0.0.9999");
        assert_eq!(Command::autofire_pause(-1).into_wire(), "R0.1.0");
    }

    #[test]
    fn raw_commands_pass_through() {
        assert_eq!(Command::from("S0&o2.43&").into_wire(), "S0&o2.43&");
    }
}
