use serde::Serialize;
use std::fmt;

/// Connection state of one device session
///
/// ```text
/// Disconnected ──open ok──► Connected ──unhook──► Disconnecting ──writes drained / grace──► Disconnected
///      │
///      └──open failed──► Error (until the next hook)
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Disconnecting,
    Error,
}

impl ConnectionState {
    /// Whether a write may be handed to the link in this state
    pub fn can_write(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Disconnecting)
    }

    /// Whether non-important commands are silently dropped in this state
    pub fn suppresses_routine_traffic(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnecting => "DISCONNECTING",
            ConnectionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Snapshot handed to lifecycle callbacks and returned by `SessionHandle::info`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HookInfo {
    /// Identifies the hooked game, `None` between hooks
    pub key: Option<String>,
    pub player: u8,
    pub port: String,
    pub state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_match_wire_reports() {
        assert_eq!(ConnectionState::Connected.to_string(), "CONNECTED");
        assert_eq!(ConnectionState::Disconnecting.to_string(), "DISCONNECTING");
        assert_eq!(ConnectionState::Error.to_string(), "ERROR");
    }

    #[test]
    fn only_live_states_accept_writes() {
        assert!(ConnectionState::Connected.can_write());
        assert!(ConnectionState::Disconnecting.can_write());
        assert!(!ConnectionState::Disconnected.can_write());
        assert!(!ConnectionState::Error.can_write());
        assert!(!ConnectionState::Disconnecting.suppresses_routine_traffic());
    }
}
