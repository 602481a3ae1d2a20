//! Transport bindings for feedback devices
//!
//! A [`Transport`] is the only place that knows how bytes reach a device.
//! Sessions never touch one directly: each transport is moved into a
//! [`link`] worker that serializes open/write/close and reports completions.
//!
//! ```text
//! transport/
//! ├── link.rs    - typestate port link and its worker task
//! ├── serial.rs  - serial line (GUN4IR over COM)
//! └── web.rs     - HTTP GET endpoint
//! ```

pub mod link;
pub mod serial;
pub mod web;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use link::{LinkEvent, LinkHandle};
pub use serial::SerialTransport;
pub use web::WebTransport;

/// Errors surfaced by a transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Port or endpoint could not be reached
    #[error("Failed to open {0}")]
    Open(String),

    #[error("Failed to write: {0}")]
    Write(String),

    /// A write arrived while the link was closed
    #[error("Transport is not open")]
    NotOpen,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A blocking worker panicked or was cancelled
    #[error("Transport task failed: {0}")]
    Task(String),
}

/// Capability consumed by the session core
#[async_trait]
pub trait Transport: Send {
    /// Path or address, for logs and lifecycle payloads
    fn describe(&self) -> &str;

    async fn open(&mut self) -> Result<(), TransportError>;

    async fn write(&mut self, command: &[u8]) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// Which binding the configured players use
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Com,
    Web,
}

/// Build the transport for one player slot, `None` for a dummy slot
pub fn build_transport(
    device_type: DeviceType,
    path: &str,
    baud_rate: u32,
) -> Result<Option<Box<dyn Transport>>, TransportError> {
    if path.is_empty() {
        return Ok(None);
    }
    let transport: Box<dyn Transport> = match device_type {
        DeviceType::Com => Box::new(SerialTransport::new(path, baud_rate)),
        DeviceType::Web => Box::new(WebTransport::new(path)?),
    };
    Ok(Some(transport))
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every open, write and close in order
    #[derive(Clone, Default)]
    pub struct Recorder {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        pub fn push(&self, entry: String) {
            if let Ok(mut entries) = self.entries.lock() {
                entries.push(entry);
            }
        }

        pub fn entries(&self) -> Vec<String> {
            self.entries
                .lock()
                .map(|entries| entries.clone())
                .unwrap_or_default()
        }

        /// Only the commands that reached the device
        pub fn writes(&self) -> Vec<String> {
            self.entries()
                .into_iter()
                .filter_map(|entry| entry.strip_prefix("write ").map(str::to_string))
                .collect()
        }

        pub fn count(&self, entry: &str) -> usize {
            self.entries().iter().filter(|e| e.as_str() == entry).count()
        }
    }

    pub struct MockTransport {
        pub path: String,
        pub recorder: Recorder,
        pub fail_open: bool,
        pub fail_writes: bool,
    }

    impl MockTransport {
        pub fn healthy(recorder: &Recorder) -> Self {
            Self {
                path: "COM9".to_string(),
                recorder: recorder.clone(),
                fail_open: false,
                fail_writes: false,
            }
        }

        pub fn unreachable(recorder: &Recorder) -> Self {
            Self {
                fail_open: true,
                ..Self::healthy(recorder)
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn describe(&self) -> &str {
            &self.path
        }

        async fn open(&mut self) -> Result<(), TransportError> {
            self.recorder.push("open".to_string());
            if self.fail_open {
                return Err(TransportError::Open(self.path.clone()));
            }
            Ok(())
        }

        async fn write(&mut self, command: &[u8]) -> Result<(), TransportError> {
            let command = String::from_utf8_lossy(command).to_string();
            if self.fail_writes {
                self.recorder.push(format!("failed {}", command));
                return Err(TransportError::Write(command));
            }
            self.recorder.push(format!("write {}", command));
            Ok(())
        }

        async fn close(&mut self) {
            self.recorder.push("close".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_is_a_dummy_slot() {
        assert!(matches!(build_transport(DeviceType::Com, "", 57600), Ok(None)));
        assert!(matches!(build_transport(DeviceType::Web, "", 57600), Ok(None)));
    }

    #[test]
    fn configured_path_builds_the_requested_binding() {
        let serial = build_transport(DeviceType::Com, "COM3", 57600)
            .ok()
            .flatten()
            .map(|t| t.describe().to_string());
        assert_eq!(serial.as_deref(), Some("COM3"));
    }
}
