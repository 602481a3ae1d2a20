//! Session Handle - public API of one device session
//!
//! Every call turns into a [`SessionAction`] on the session's inbox; nothing
//! here blocks or awaits the device. Only [`SessionHandle::info`] waits, for
//! the session's answer.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::device_session::DeviceSession;
use super::output::{FeedbackOutput, LifecycleCallback, Priority};
use super::state::HookInfo;
use crate::lifecycle::LifecycleBus;
use crate::transport::Transport;

/// Configuration of one player slot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    /// 1-based player index
    pub player: u8,

    /// Serial path or web address, empty for a dummy slot
    pub port: String,

    /// Pulse the motor for 200 ms whenever the session takes over
    pub rumble_on_hook: bool,

    /// Static latency added to every non-instantaneous command (ms)
    ///
    /// Adds up with the per-game delay given on hook.
    pub delay_ms: u64,

    /// Open the port at start-up and keep it open between games
    pub preconnect: bool,

    /// Close the port after unhook even when pre-connected
    pub quit_after_unhook: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            player: 1,
            port: String::new(),
            rumble_on_hook: false,
            delay_ms: 0,
            preconnect: false,
            quit_after_unhook: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session settings: {0}")]
    InvalidSettings(String),

    /// The session task is gone
    #[error("Channel error: {0}")]
    ChannelError(String),
}

/// Messages processed by the session task
pub enum SessionAction {
    Hook {
        game_delay_ms: u64,
        key: Option<String>,
    },
    Unhook,
    SendAction {
        command: String,
        priority: Priority,
    },
    FireRecoil {
        pulses: i32,
    },
    SetRumbleEffect {
        effect: String,
        strength: i32,
        duration_ms: u64,
        priority: Priority,
    },
    StartRumblePulsing {
        effect: String,
        strength: i32,
        on_ms: u64,
        off_ms: u64,
    },
    StopRumblePulsing {
        effect: String,
    },
    SetAutofireTimings {
        hold_ms: i32,
        pause_ms: i32,
    },
    StartAutofire {
        length_ms: Option<u32>,
    },
    StopAutofire,
    SetOnConnected(LifecycleCallback),
    SetOnDisconnecting(LifecycleCallback),
    Info {
        response_tx: oneshot::Sender<HookInfo>,
    },
}

impl SessionAction {
    fn name(&self) -> &'static str {
        match self {
            SessionAction::Hook { .. } => "hook",
            SessionAction::Unhook => "unhook",
            SessionAction::SendAction { .. } => "send_action",
            SessionAction::FireRecoil { .. } => "fire_recoil",
            SessionAction::SetRumbleEffect { .. } => "set_rumble_effect",
            SessionAction::StartRumblePulsing { .. } => "start_rumble_pulsing_effect",
            SessionAction::StopRumblePulsing { .. } => "stop_rumble_pulsing_effect",
            SessionAction::SetAutofireTimings { .. } => "set_autofire_timings",
            SessionAction::StartAutofire { .. } => "start_autofire",
            SessionAction::StopAutofire => "stop_autofire",
            SessionAction::SetOnConnected(_) => "set_on_connected",
            SessionAction::SetOnDisconnecting(_) => "set_on_disconnecting",
            SessionAction::Info { .. } => "info",
        }
    }
}

/// Cheap, cloneable handle to a running device session
///
/// The session task stops once the last handle is dropped; it then cancels
/// its timers and closes the port.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionAction>,
    player: u8,
}

impl SessionHandle {
    /// Spawn a session for one player slot
    ///
    /// `transport` is `None` for a dummy slot. With `preconnect` set the port
    /// is opened right away.
    pub fn spawn(
        settings: Option<SessionSettings>,
        transport: Option<Box<dyn Transport>>,
        bus: LifecycleBus,
    ) -> Result<Self, SessionError> {
        let settings = settings.unwrap_or_default();
        if settings.player == 0 {
            return Err(SessionError::InvalidSettings(
                "player index starts at 1".to_string(),
            ));
        }
        if transport.is_some() && settings.port.is_empty() {
            return Err(SessionError::InvalidSettings(format!(
                "P{} has a transport but no port",
                settings.player
            )));
        }

        info!(
            "Spawning session P{} (delay {} ms, preconnect {}, quit after unhook {})",
            settings.player, settings.delay_ms, settings.preconnect, settings.quit_after_unhook
        );
        let player = settings.player;
        let (tx, rx) = mpsc::unbounded_channel();
        DeviceSession::start(settings, transport, bus, rx);

        Ok(Self { tx, player })
    }

    pub fn player(&self) -> u8 {
        self.player
    }

    /// Begin a game session, `game_delay_ms` adds to the static delay
    pub fn on_hook(&self, game_delay_ms: u64, key: Option<String>) {
        self.send(SessionAction::Hook { game_delay_ms, key });
    }

    pub fn on_unhook(&self) {
        self.send(SessionAction::Unhook);
    }

    pub fn set_on_connected(&self, callback: LifecycleCallback) {
        self.send(SessionAction::SetOnConnected(callback));
    }

    pub fn set_on_disconnecting(&self, callback: LifecycleCallback) {
        self.send(SessionAction::SetOnDisconnecting(callback));
    }

    /// Current `{key, player, port, state}`
    pub async fn info(&self) -> Result<HookInfo, SessionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(SessionAction::Info { response_tx })
            .map_err(|_| SessionError::ChannelError(format!("P{} session stopped", self.player)))?;
        response_rx
            .await
            .map_err(|e| SessionError::ChannelError(e.to_string()))
    }

    fn send(&self, action: SessionAction) {
        let name = action.name();
        match self.tx.send(action) {
            Ok(()) => debug!("P{} <- {}", self.player, name),
            Err(_) => error!("P{} session is gone, dropped {}", self.player, name),
        }
    }
}

impl FeedbackOutput for SessionHandle {
    fn send_action(&mut self, command: &str, priority: Priority) {
        self.send(SessionAction::SendAction {
            command: command.to_string(),
            priority,
        });
    }

    fn fire_recoil(&mut self, pulses: i32) {
        self.send(SessionAction::FireRecoil { pulses });
    }

    fn set_rumble_effect(&mut self, effect: &str, strength: i32, duration_ms: u64, priority: Priority) {
        self.send(SessionAction::SetRumbleEffect {
            effect: effect.to_string(),
            strength,
            duration_ms,
            priority,
        });
    }

    fn start_rumble_pulsing_effect(&mut self, effect: &str, strength: i32, on_ms: u64, off_ms: u64) {
        self.send(SessionAction::StartRumblePulsing {
            effect: effect.to_string(),
            strength,
            on_ms,
            off_ms,
        });
    }

    fn stop_rumble_pulsing_effect(&mut self, effect: &str) {
        self.send(SessionAction::StopRumblePulsing {
            effect: effect.to_string(),
        });
    }

    fn set_autofire_timings(&mut self, hold_ms: i32, pause_ms: i32) {
        self.send(SessionAction::SetAutofireTimings { hold_ms, pause_ms });
    }

    fn start_autofire(&mut self, length_ms: Option<u32>) {
        self.send(SessionAction::StartAutofire { length_ms });
    }

    fn stop_autofire(&mut self) {
        self.send(SessionAction::StopAutofire);
    }
}
