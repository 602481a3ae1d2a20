pub mod config;
pub mod lifecycle;
pub mod overrides;
pub mod session;
pub mod transport;

use crate::config::AppConfig;
use crate::lifecycle::{ConnectionTracker, LifecycleBus};
use crate::overrides::{CommandOverrides, Phase};
use crate::session::device_session::GRACE_CLOSE;
use crate::session::SessionHandle;
use crate::transport::build_transport;
use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let game_key = std::env::args().nth(1);

    // Konfiguration laden, beim ersten Start Standarddatei anlegen
    let config_path = AppConfig::default_path();
    AppConfig::ensure_default(&config_path).await?;
    let config = AppConfig::load(&config_path).await?;
    info!(
        "Loaded {} player slots from {}",
        config.players.len(),
        config_path.display()
    );

    let bus = LifecycleBus::new();
    let shutdown = CancellationToken::new();
    let tracker = ConnectionTracker::spawn(&bus, config.quit_after_unhook, shutdown.clone());

    let sessions = spawn_sessions(&config, &bus)?;
    let overrides = CommandOverrides::new(config.overrides.clone());
    if overrides.is_empty() {
        debug!("No command overrides configured");
    }

    match &game_key {
        Some(key) => {
            let game_delay_ms = config.game_delay_ms(key);
            info!("Hooking {} (game delay {} ms)", key, game_delay_ms);
            for session in &sessions {
                // Callbacks vor jedem Hook neu setzen, unhook löscht sie
                session.set_on_connected(overrides.callback(Phase::Connected));
                session.set_on_disconnecting(overrides.callback(Phase::Disconnecting));
                session.on_hook(game_delay_ms, Some(key.clone()));
            }
        }
        None => info!("No game key given, sessions stay idle until shutdown"),
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
            info!("Ctrl-C received, unhooking");
        }
        _ = shutdown.cancelled() => info!("All devices disconnected"),
    }

    for session in &sessions {
        session.on_unhook();
    }
    // In-flight writes und Grace-Close abwarten
    tokio::time::sleep(GRACE_CLOSE * 2).await;

    for session in &sessions {
        match session.info().await {
            Ok(info) => debug!("P{} ends {}", info.player, info.state),
            Err(e) => warn!("P{} did not report: {}", session.player(), e),
        }
    }
    drop(sessions);
    tracker.abort();
    info!("Shut down with {} open connections", tracker.connections());

    Ok(())
}

fn spawn_sessions(config: &AppConfig, bus: &LifecycleBus) -> Result<Vec<SessionHandle>> {
    config
        .session_settings()
        .into_iter()
        .map(|settings| {
            let player = settings.player;
            let transport = build_transport(config.device_type, &settings.port, config.baud_rate)
                .map_err(|e| eyre!("Failed to set up transport for P{}: {}", player, e))?;
            SessionHandle::spawn(Some(settings), transport, bus.clone())
                .map_err(|e| eyre!("Failed to spawn session P{}: {}", player, e))
        })
        .collect()
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
