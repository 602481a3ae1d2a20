//! Device session subsystem
//!
//! One session per player slot drives one feedback device:
//!
//! 1. [`session_handle`] - public API, turns calls into actions
//! 2. [`device_session`] - the session task: connection state, dispatch and queue
//! 3. [`effect_mixer`] - composes named rumble intents into one strength
//! 4. [`autofire`] - cadence resolution and drift tracking for autofire
//! 5. [`timers`] - owned, cancellable timers feeding back into the task
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────── DeviceSession task ────────────┐
//! SessionHandle ──►   │ inbox ─┐                                   │
//!                     │ timers ┼──► dispatch ──► LinkHandle ───────┼──► link worker ──► Transport
//!                     │ link ──┘        │                          │
//!                     │          pending queue (FIFO)              │
//!                     └────────────────────┬───────────────────────┘
//!                                          ▼
//!                                    LifecycleBus
//! ```
//!
//! Actions, timer expiries and link completions are handled one at a time, so
//! none of the session state needs locking.

pub mod autofire;
pub mod command;
pub mod device_session;
pub mod effect_mixer;
pub mod output;
pub mod session_handle;
pub mod state;
pub mod timers;


pub use command::Command;
pub use effect_mixer::{HOOK_EFFECT, MAIN_EFFECT};
pub use output::{FeedbackOutput, LifecycleCallback, Priority};
pub use session_handle::{SessionError, SessionHandle, SessionSettings};
pub use state::{ConnectionState, HookInfo};
