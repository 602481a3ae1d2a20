use async_trait::async_trait;
use serialport::SerialPort;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};

use super::{Transport, TransportError};

/// Baud rate the GUN4IR firmware listens on
pub const DEFAULT_BAUD_RATE: u32 = 57600;

const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial-line binding
///
/// `serialport` is blocking, so open and every write run on tokio's blocking
/// pool. The port handle is moved into the blocking closure and back.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            port: None,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn describe(&self) -> &str {
        &self.path
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }
        let path = self.path.clone();
        let baud_rate = self.baud_rate;
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(path, baud_rate)
                .timeout(WRITE_TIMEOUT)
                .open()
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))??;
        info!("Opened serial port {} at {} baud", self.path, self.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    async fn write(&mut self, command: &[u8]) -> Result<(), TransportError> {
        let mut port = self.port.take().ok_or(TransportError::NotOpen)?;
        let bytes = command.to_vec();
        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = port.write_all(&bytes).and_then(|_| port.flush());
            (port, result)
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?;
        self.port = Some(port);
        result?;
        debug!("Wrote {} bytes to {}", command.len(), self.path);
        Ok(())
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.path);
        }
    }
}
