use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::session::SessionSettings;
use crate::transport::serial::DEFAULT_BAUD_RATE;
use crate::transport::DeviceType;

const CONFIG_DIR: &str = ".config/openfeedback";
const CONFIG_FILE: &str = "config.toml";

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "OPENFEEDBACK_CONFIG";

/// Application configuration, one file for all players
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub device_type: DeviceType,
    /// One entry per player; an empty string is a dummy slot
    pub players: Vec<String>,
    pub rumble_on_hook: bool,
    pub delay_ms: u64,
    pub preconnect: bool,
    pub quit_after_unhook: bool,
    pub baud_rate: u32,
    /// Per-game settings keyed by game key
    pub games: HashMap<String, GameConfig>,
    pub overrides: OverrideConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    pub game_delay_ms: u64,
}

/// Commands sent on connect and before disconnect
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct OverrideConfig {
    pub connected: Vec<String>,
    pub disconnecting: Vec<String>,
    /// Extra commands for one game, sent after the generic ones
    pub games: HashMap<String, GameOverrides>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct GameOverrides {
    pub connected: Vec<String>,
    pub disconnecting: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Com,
            players: vec!["COM3".to_string(), String::new()],
            rumble_on_hook: true,
            delay_ms: 0,
            preconnect: false,
            quit_after_unhook: false,
            baud_rate: DEFAULT_BAUD_RATE,
            games: HashMap::new(),
            overrides: OverrideConfig::default(),
        }
    }
}

impl AppConfig {
    /// Config path: `$OPENFEEDBACK_CONFIG` or `~/.config/openfeedback/config.toml`
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::parse(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write the default config to `path` unless a file is already there
    pub async fn ensure_default(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check config file {}: {}", path.display(), e))?
        {
            return Ok(());
        }

        info!("Creating default configuration at {}", path.display());
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    pub fn game_delay_ms(&self, key: &str) -> u64 {
        self.games.get(key).map_or(0, |game| game.game_delay_ms)
    }

    /// Settings for every configured player, numbered from 1
    pub fn session_settings(&self) -> Vec<SessionSettings> {
        if self.players.len() > usize::from(u8::MAX) {
            warn!(
                "{} players configured, only the first {} are used",
                self.players.len(),
                u8::MAX
            );
        }
        self.players
            .iter()
            .zip(1..=u8::MAX)
            .map(|(port, player)| SessionSettings {
                player,
                port: port.clone(),
                rumble_on_hook: self.rumble_on_hook,
                delay_ms: self.delay_ms,
                preconnect: self.preconnect,
                quit_after_unhook: self.quit_after_unhook,
            })
            .collect()
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
device_type = "web"
players = ["http://lights.local", ""]
delay_ms = 15
preconnect = true

[games.ptblank]
game_delay_ms = 40

[overrides]
disconnecting = ["E"]

[overrides.games.ptblank]
connected = ["S0&o2.43&"]
"#;

    #[test]
    fn parses_a_full_file() {
        let config = AppConfig::parse(SAMPLE).expect("valid config");
        assert_eq!(config.device_type, DeviceType::Web);
        assert_eq!(config.players.len(), 2);
        assert_eq!(config.delay_ms, 15);
        assert!(config.preconnect);
        assert_eq!(config.game_delay_ms("ptblank"), 40);
        assert_eq!(config.game_delay_ms("unknown"), 0);
        assert_eq!(config.overrides.disconnecting, ["E"]);
        assert_eq!(
            config.overrides.games["ptblank"].connected,
            ["S0&o2.43&"]
        );
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = AppConfig::parse("players = [\"COM5\"]").expect("valid config");
        assert_eq!(config.device_type, DeviceType::Com);
        assert_eq!(config.baud_rate, 57600);
        assert!(config.rumble_on_hook);
        assert!(config.overrides.connected.is_empty());
    }

    #[test]
    fn players_become_numbered_sessions() {
        let config = AppConfig::parse(SAMPLE).expect("valid config");
        let sessions = config.session_settings();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].player, 1);
        assert_eq!(sessions[0].port, "http://lights.local");
        assert_eq!(sessions[0].delay_ms, 15);
        assert_eq!(sessions[1].player, 2);
        assert!(sessions[1].port.is_empty());
        assert!(sessions[1].preconnect);
    }

    #[test]
    fn rejects_unknown_device_type() {
        assert!(AppConfig::parse("device_type = \"usb\"").is_err());
    }

    #[tokio::test]
    async fn default_file_is_written_once() {
        let dir = std::env::temp_dir().join(format!("openfeedback-test-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = tokio::fs::remove_dir_all(&dir).await;

        AppConfig::ensure_default(&path).await.expect("default written");
        let written = AppConfig::load(&path).await.expect("default parses");
        assert_eq!(written, AppConfig::default());

        tokio::fs::write(&path, "delay_ms = 9").await.expect("overwrite");
        AppConfig::ensure_default(&path).await.expect("existing file kept");
        assert_eq!(AppConfig::load(&path).await.expect("parses").delay_ms, 9);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
