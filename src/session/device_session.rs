use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::autofire::{AutofireScheduler, AutofireTimings};
use super::command::{Command, MAX_STRENGTH};
use super::effect_mixer::{EffectMixer, HOOK_EFFECT};
use super::output::{FeedbackOutput, LifecycleCallback, Priority};
use super::session_handle::{SessionAction, SessionSettings};
use super::state::{ConnectionState, HookInfo};
use super::timers::{TimerId, TimerKind, TimerRegistry};
use crate::lifecycle::{LifecycleBus, LifecycleEvent};
use crate::transport::{LinkEvent, LinkHandle, Transport, TransportError};

/// Time in-flight writes get before the link is closed after unhook
pub const GRACE_CLOSE: Duration = Duration::from_millis(100);

/// Length of the rumble pulse sent on hook
pub const HOOK_RUMBLE_MS: u64 = 200;

/// Progress of the open performed at start-up when pre-connecting
#[derive(Debug, PartialEq, Eq)]
enum Preconnect {
    Off,
    Pending { hook_waiting: bool },
    Ready,
    Failed(String),
}

/// Why an open was requested; resolved in request order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OpenPurpose {
    Hook,
    Preconnect,
    /// The hook that asked for it was unhooked before the link answered
    Abandoned,
}

#[derive(Clone, Copy, Debug)]
enum CallbackSlot {
    Connected,
    Disconnecting,
}

/// One player's device session
///
/// Owned by a single task; every mutation happens in [`DeviceSession::run`].
pub(crate) struct DeviceSession {
    settings: SessionSettings,
    bus: LifecycleBus,
    /// `None` for a dummy session
    link: Option<LinkHandle>,
    /// Whether a `Connected` event was published for the current link
    link_open: bool,
    opening: VecDeque<OpenPurpose>,
    preconnect: Preconnect,

    state: ConnectionState,
    game_delay_ms: u64,
    key: Option<String>,
    pending: VecDeque<String>,
    outstanding_writes: usize,

    mixer: EffectMixer,
    autofire: AutofireScheduler,
    pulsing: HashMap<String, TimerId>,
    timers: TimerRegistry,

    on_connected: Option<LifecycleCallback>,
    on_disconnecting: Option<LifecycleCallback>,
}

impl DeviceSession {
    /// Spawn the session task; it runs until every sender of `inbox` is gone
    pub(crate) fn start(
        settings: SessionSettings,
        transport: Option<Box<dyn Transport>>,
        bus: LifecycleBus,
        inbox: mpsc::UnboundedReceiver<SessionAction>,
    ) -> tokio::task::JoinHandle<()> {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let link = transport.map(|transport| LinkHandle::spawn(transport, settings.player, link_tx));

        let session = DeviceSession {
            bus,
            link,
            link_open: false,
            opening: VecDeque::new(),
            preconnect: Preconnect::Off,
            state: ConnectionState::Disconnected,
            game_delay_ms: 0,
            key: None,
            pending: VecDeque::new(),
            outstanding_writes: 0,
            mixer: EffectMixer::new(),
            autofire: AutofireScheduler::new(),
            pulsing: HashMap::new(),
            timers: TimerRegistry::new(timer_tx),
            on_connected: None,
            on_disconnecting: None,
            settings,
        };
        tokio::spawn(session.run(inbox, link_rx, timer_rx))
    }

    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<SessionAction>,
        mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
        mut timer_fired: mpsc::UnboundedReceiver<TimerId>,
    ) {
        info!(
            "P{} session started on {}",
            self.settings.player,
            self.describe_port()
        );
        if self.settings.preconnect {
            self.begin_preconnect();
        }

        loop {
            tokio::select! {
                biased;

                Some(event) = link_events.recv() => self.handle_link_event(event),
                Some(id) = timer_fired.recv() => self.handle_timer(id),
                action = inbox.recv() => match action {
                    Some(action) => self.handle_action(action),
                    None => break,
                },
            }
        }

        self.shutdown();
    }

    fn handle_action(&mut self, action: SessionAction) {
        match action {
            SessionAction::Hook { game_delay_ms, key } => self.on_hook(game_delay_ms, key),
            SessionAction::Unhook => self.on_unhook(),
            SessionAction::SendAction { command, priority } => self.send_action(&command, priority),
            SessionAction::FireRecoil { pulses } => self.fire_recoil(pulses),
            SessionAction::SetRumbleEffect {
                effect,
                strength,
                duration_ms,
                priority,
            } => self.set_rumble_effect(&effect, strength, duration_ms, priority),
            SessionAction::StartRumblePulsing {
                effect,
                strength,
                on_ms,
                off_ms,
            } => self.start_rumble_pulsing_effect(&effect, strength, on_ms, off_ms),
            SessionAction::StopRumblePulsing { effect } => self.stop_rumble_pulsing_effect(&effect),
            SessionAction::SetAutofireTimings { hold_ms, pause_ms } => {
                self.set_autofire_timings(hold_ms, pause_ms)
            }
            SessionAction::StartAutofire { length_ms } => self.start_autofire(length_ms),
            SessionAction::StopAutofire => self.stop_autofire(),
            SessionAction::SetOnConnected(callback) => self.on_connected = Some(callback),
            SessionAction::SetOnDisconnecting(callback) => self.on_disconnecting = Some(callback),
            SessionAction::Info { response_tx } => {
                if response_tx.send(self.info()).is_err() {
                    debug!("P{} info requester went away", self.settings.player);
                }
            }
        }
    }

    // ---- connection lifecycle ----

    fn on_hook(&mut self, game_delay_ms: u64, key: Option<String>) {
        info!(
            "P{} hook {} (game delay {} ms)",
            self.settings.player,
            key.as_deref().unwrap_or("-"),
            game_delay_ms
        );
        self.key = key;
        self.game_delay_ms = game_delay_ms;

        // A close still waiting out its grace period happens now, before reopening
        if let Some(grace) = self.timers.find(|kind| *kind == TimerKind::GraceClose) {
            self.timers.cancel(grace);
            debug!("P{} closing early for re-hook", self.settings.player);
            self.close_link();
            self.preconnect = Preconnect::Off;
        }

        if !self.is_pre_armed() {
            self.state = ConnectionState::Disconnected;
        }

        let Some(link) = &self.link else {
            self.state = ConnectionState::Connected;
            info!("P{} connected (dummy)", self.settings.player);
            return;
        };

        match self.preconnect {
            Preconnect::Off => {
                self.opening.push_back(OpenPurpose::Hook);
                link.open();
            }
            Preconnect::Pending {
                ref mut hook_waiting,
            } => {
                debug!("P{} hook waits for pre-connect", self.settings.player);
                *hook_waiting = true;
            }
            Preconnect::Ready => self.serve_preconnected_hook(),
            Preconnect::Failed(ref reason) => {
                warn!("P{} pre-connect failed: {}", self.settings.player, reason);
            }
        }
    }

    fn on_unhook(&mut self) {
        info!("P{} unhook", self.settings.player);
        let armed = self.timers.ids();

        self.invoke(CallbackSlot::Disconnecting);
        self.pending.clear();
        self.on_connected = None;
        self.on_disconnecting = None;

        if self.state == ConnectionState::Connected && !self.settings.preconnect {
            self.state = ConnectionState::Disconnecting;
        }

        // Only commands the callback deferred outlive the unhook
        let cancelled = self.timers.cancel_many(&armed)
            + self.timers.cancel_where(|kind| {
                matches!(
                    kind,
                    TimerKind::RumbleExpiry { .. } | TimerKind::RumblePulse { .. } | TimerKind::Autofire
                )
            });
        if cancelled > 0 {
            debug!("P{} cancelled {} timers", self.settings.player, cancelled);
        }
        for (_, timer) in self.pulsing.drain() {
            self.timers.cancel(timer);
        }
        self.mixer.reset();
        if let Some(timer) = self.autofire.reset() {
            self.timers.cancel(timer);
        }

        for purpose in self.opening.iter_mut() {
            if *purpose == OpenPurpose::Hook {
                *purpose = OpenPurpose::Abandoned;
            }
        }
        if let Preconnect::Pending { hook_waiting } = &mut self.preconnect {
            *hook_waiting = false;
        }

        if self.state.can_write() {
            self.dispatch(Command::rumble_off().into_wire(), Priority::URGENT);
            self.dispatch(Command::RestoreDefault.into_wire(), Priority::URGENT);
        } else {
            debug!(
                "P{} not connected ({}), skipping feedback reset",
                self.settings.player, self.state
            );
        }

        if (!self.settings.preconnect || self.settings.quit_after_unhook)
            && self.timers.find(|kind| *kind == TimerKind::GraceClose).is_none()
        {
            self.timers.arm_once(GRACE_CLOSE, TimerKind::GraceClose);
        }

        self.game_delay_ms = 0;
        self.key = None;
    }

    fn begin_preconnect(&mut self) {
        let Some(link) = &self.link else {
            debug!("P{} dummy session ignores pre-connect", self.settings.player);
            return;
        };
        info!("P{} pre-connecting to {}", self.settings.player, link.port());
        self.preconnect = Preconnect::Pending {
            hook_waiting: false,
        };
        self.state = ConnectionState::Disconnected;
        self.opening.push_back(OpenPurpose::Preconnect);
        link.open();
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened(result) => self.on_link_opened(result),
            LinkEvent::WriteComplete(result) => self.on_write_complete(result),
        }
    }

    fn on_link_opened(&mut self, result: Result<(), TransportError>) {
        let Some(purpose) = self.opening.pop_front() else {
            warn!("P{} unexpected open completion", self.settings.player);
            return;
        };

        match (purpose, result) {
            (OpenPurpose::Abandoned, result) => {
                debug!(
                    "P{} open resolved after unhook ({})",
                    self.settings.player,
                    if result.is_ok() { "ok" } else { "failed" }
                );
            }
            (purpose, Err(e)) => {
                error!(
                    "P{} not connected on {}: {}",
                    self.settings.player,
                    self.describe_port(),
                    e
                );
                self.state = ConnectionState::Error;
                if purpose == OpenPurpose::Preconnect {
                    if self.preconnect == (Preconnect::Pending { hook_waiting: true }) {
                        warn!("P{} pre-connect failed: {}", self.settings.player, e);
                    }
                    self.preconnect = Preconnect::Failed(e.to_string());
                }
            }
            (purpose, Ok(())) => {
                self.state = ConnectionState::Connected;
                if std::mem::replace(&mut self.link_open, true) {
                    debug!("P{} re-hooked on an open link", self.settings.player);
                } else {
                    info!(
                        "P{} connected on {}",
                        self.settings.player,
                        self.describe_port()
                    );
                    self.bus.publish(LifecycleEvent::connected(
                        self.settings.player,
                        &self.settings.port,
                    ));
                }

                let preconnecting = purpose == OpenPurpose::Preconnect;
                self.take_over(preconnecting);
                self.drain_pending();

                if preconnecting {
                    let hook_waiting =
                        self.preconnect == (Preconnect::Pending { hook_waiting: true });
                    self.preconnect = Preconnect::Ready;
                    if hook_waiting {
                        self.serve_preconnected_hook();
                    }
                } else {
                    self.invoke(CallbackSlot::Connected);
                }
            }
        }
    }

    /// Real hook on a link that was opened by the pre-connect
    fn serve_preconnected_hook(&mut self) {
        debug!("P{} hook on pre-connected link", self.settings.player);
        self.take_over(false);
        self.drain_pending();
        self.invoke(CallbackSlot::Connected);
    }

    /// `S6`, optional hook rumble; `revert` hands control back with `E`
    fn take_over(&mut self, revert: bool) {
        self.dispatch(Command::TakeOver.into_wire(), Priority::URGENT);
        if self.settings.rumble_on_hook {
            self.mix_rumble(HOOK_EFFECT, MAX_STRENGTH, HOOK_RUMBLE_MS, Priority::URGENT);
            if revert {
                self.dispatch(Command::RestoreDefault.into_wire(), Priority::ROUTINE);
            }
        }
    }

    fn drain_pending(&mut self) {
        let queued: Vec<String> = self.pending.drain(..).collect();
        if !queued.is_empty() {
            debug!(
                "P{} replaying {} queued commands",
                self.settings.player,
                queued.len()
            );
        }
        for command in queued {
            self.dispatch(command, Priority::ROUTINE);
        }
    }

    fn on_write_complete(&mut self, result: Result<(), TransportError>) {
        self.outstanding_writes = self.outstanding_writes.saturating_sub(1);
        if let Err(e) = result {
            debug!("P{} write counted as completed: {}", self.settings.player, e);
        }
        if self.state == ConnectionState::Disconnecting && self.outstanding_writes == 0 {
            self.close_link();
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Ask the link to close and publish the disconnect once per open
    fn close_link(&mut self) {
        if let Some(link) = &self.link {
            link.close();
        }
        if std::mem::take(&mut self.link_open) {
            info!(
                "P{} disconnected from {}",
                self.settings.player,
                self.describe_port()
            );
            self.bus.publish(LifecycleEvent::disconnected(
                self.settings.player,
                &self.settings.port,
            ));
        }
    }

    fn shutdown(&mut self) {
        let cancelled = self.timers.cancel_all();
        self.close_link();
        info!(
            "P{} session stopped ({} timers cancelled)",
            self.settings.player, cancelled
        );
    }

    // ---- dispatch ----

    fn dispatch(&mut self, command: String, priority: Priority) {
        if !priority.important && self.state.suppresses_routine_traffic() {
            trace!("P{} dropped {} while {}", self.settings.player, command, self.state);
            return;
        }

        let latency = self.settings.delay_ms + self.game_delay_ms;
        if latency == 0 || priority.instantaneous {
            if self.state.can_write() {
                self.write(command);
            } else if self.state != ConnectionState::Error {
                debug!("P{} queued {}", self.settings.player, command);
                self.pending.push_back(command);
            }
        } else {
            trace!("P{} deferred {} by {} ms", self.settings.player, command, latency);
            self.timers.arm_once(
                Duration::from_millis(latency),
                TimerKind::DeferredCommand(command),
            );
        }
    }

    fn write(&mut self, command: String) {
        match &self.link {
            Some(link) => {
                self.outstanding_writes += 1;
                debug!("P{} > {}", self.settings.player, command);
                link.write(command);
            }
            None => trace!("P{} (dummy) > {}", self.settings.player, command),
        }
    }

    // ---- timers ----

    fn handle_timer(&mut self, id: TimerId) {
        let Some(kind) = self.timers.fire(id) else {
            trace!("P{} ignoring stale timer {}", self.settings.player, id);
            return;
        };

        match kind {
            TimerKind::DeferredCommand(command) => self.dispatch(command, Priority::DEFERRED),
            TimerKind::RumbleExpiry {
                effect,
                generation,
                instantaneous,
                important,
            } => {
                if self.mixer.is_current(&effect, generation) {
                    self.mix_rumble(
                        &effect,
                        0,
                        0,
                        Priority {
                            instantaneous,
                            important,
                        },
                    );
                } else {
                    trace!("P{} {} superseded before expiry", self.settings.player, effect);
                }
            }
            TimerKind::RumblePulse {
                effect,
                strength,
                on_ms,
            } => self.mix_rumble(&effect, strength, on_ms, Priority::ROUTINE),
            TimerKind::Autofire => {
                if let Some(drift) = self.autofire.observe_tick(Instant::now()) {
                    debug!("P{} autofire drift {:+.2} ms", self.settings.player, drift);
                }
                self.fire_recoil(1);
            }
            TimerKind::GraceClose => {
                self.close_link();
                self.state = ConnectionState::Disconnected;
                self.preconnect = Preconnect::Off;
            }
        }
    }

    // ---- rumble ----

    fn mix_rumble(&mut self, effect: &str, strength: i32, duration_ms: u64, priority: Priority) {
        let expiring = self
            .timers
            .count(|kind| matches!(kind, TimerKind::RumbleExpiry { .. }));
        if self.mixer.is_redundant(strength, duration_ms, expiring) {
            trace!("P{} rumble {} unchanged", self.settings.player, strength);
            return;
        }

        let outcome = self.mixer.apply(effect, strength);
        self.dispatch(Command::Rumble(outcome.mixed).into_wire(), priority);

        if duration_ms > 0 {
            self.timers.arm_once(
                Duration::from_millis(duration_ms),
                TimerKind::RumbleExpiry {
                    effect: effect.to_string(),
                    generation: outcome.generation,
                    instantaneous: priority.instantaneous,
                    important: priority.important,
                },
            );
        }
    }

    // ---- helpers ----

    fn is_pre_armed(&self) -> bool {
        self.preconnect != Preconnect::Off
    }

    fn describe_port(&self) -> &str {
        self.link.as_ref().map_or("(dummy)", |link| link.port())
    }

    fn info(&self) -> HookInfo {
        HookInfo {
            key: self.key.clone(),
            player: self.settings.player,
            port: self.settings.port.clone(),
            state: self.state,
        }
    }

    /// Run a callback with the session as its output
    ///
    /// The callback is taken out of its slot for the call and only put back
    /// when the callback did not register a replacement.
    fn invoke(&mut self, slot: CallbackSlot) {
        let Some(mut callback) = self.slot(slot).take() else {
            return;
        };
        let info = self.info();
        debug!("P{} running {:?} callback", self.settings.player, slot);
        callback(&mut *self as &mut dyn FeedbackOutput, &info);
        let current = self.slot(slot);
        if current.is_none() {
            *current = Some(callback);
        }
    }

    fn slot(&mut self, slot: CallbackSlot) -> &mut Option<LifecycleCallback> {
        match slot {
            CallbackSlot::Connected => &mut self.on_connected,
            CallbackSlot::Disconnecting => &mut self.on_disconnecting,
        }
    }
}

impl FeedbackOutput for DeviceSession {
    fn send_action(&mut self, command: &str, priority: Priority) {
        self.dispatch(command.to_string(), priority);
    }

    fn fire_recoil(&mut self, pulses: i32) {
        self.dispatch(Command::recoil(pulses).into_wire(), Priority::ROUTINE);
    }

    fn set_rumble_effect(&mut self, effect: &str, strength: i32, duration_ms: u64, priority: Priority) {
        self.mix_rumble(effect, strength, duration_ms, priority);
    }

    fn start_rumble_pulsing_effect(&mut self, effect: &str, strength: i32, on_ms: u64, off_ms: u64) {
        let period = on_ms + off_ms;
        if period == 0 {
            warn!(
                "P{} pulsing effect {} needs a non-zero period",
                self.settings.player, effect
            );
            return;
        }
        if let Some(previous) = self.pulsing.remove(effect) {
            self.timers.cancel(previous);
        }
        let timer = self.timers.arm_every(
            Duration::from_millis(period),
            TimerKind::RumblePulse {
                effect: effect.to_string(),
                strength,
                on_ms,
            },
        );
        self.pulsing.insert(effect.to_string(), timer);
    }

    fn stop_rumble_pulsing_effect(&mut self, effect: &str) {
        if let Some(timer) = self.pulsing.remove(effect) {
            self.timers.cancel(timer);
        }
        self.mix_rumble(effect, 0, 0, Priority::ROUTINE);
    }

    fn set_autofire_timings(&mut self, hold_ms: i32, pause_ms: i32) {
        let timings = AutofireTimings::bounded(hold_ms, pause_ms);
        self.autofire.set_timings(timings);
        self.dispatch(
            Command::autofire_hold(timings.hold as i32).into_wire(),
            Priority::CONFIGURATION,
        );
        self.dispatch(
            Command::autofire_pause(timings.pause as i32).into_wire(),
            Priority::CONFIGURATION,
        );
    }

    fn start_autofire(&mut self, length_ms: Option<u32>) {
        let plan = self.autofire.plan(length_ms);
        if let Some(timings) = plan.apply_timings {
            self.set_autofire_timings(timings.hold as i32, timings.pause as i32);
        }
        if self.autofire.is_armed_with(&plan.settings) {
            trace!("P{} autofire already running", self.settings.player);
            return;
        }
        self.stop_autofire();

        info!(
            "P{} autofire every {} ms (hold {}, pause {})",
            self.settings.player, plan.settings.length, plan.settings.hold, plan.settings.pause
        );
        self.fire_recoil(1);
        let timer = self
            .timers
            .arm_every(plan.settings.period(), TimerKind::Autofire);
        self.autofire.arm(timer, plan.settings, Instant::now());
    }

    fn stop_autofire(&mut self) {
        if let Some(timer) = self.autofire.disarm() {
            self.timers.cancel(timer);
            info!("P{} autofire stopped", self.settings.player);
        }
    }
}
