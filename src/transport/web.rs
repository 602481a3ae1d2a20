use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Transport, TransportError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP-GET binding
///
/// Each command is an absolute URL that gets fetched; there is no connection
/// to open. Commands that are not URLs cannot be delivered and are skipped.
pub struct WebTransport {
    address: String,
    client: Client,
}

impl WebTransport {
    pub fn new(address: impl Into<String>) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            address: address.into(),
            client,
        })
    }
}

/// Whether `command` can be fetched as-is
pub fn is_url(command: &str) -> bool {
    let lower = command.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait]
impl Transport for WebTransport {
    fn describe(&self) -> &str {
        &self.address
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn write(&mut self, command: &[u8]) -> Result<(), TransportError> {
        let url = String::from_utf8_lossy(command);
        if !is_url(&url) {
            warn!("Skipping command for {}, not a URL: {}", self.address, url);
            return Ok(());
        }
        let response = self.client.get(url.as_ref()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Write(format!("GET {} returned {}", url, status)));
        }
        debug!("GET {} -> {}", url, status);
        Ok(())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_absolute_http_urls_are_sent() {
        assert!(is_url("http://192.168.1.21:1337/white/d6"));
        assert!(is_url("HTTPS://lights.local/on"));
        assert!(!is_url("F0.1.1"));
        assert!(!is_url("httpd"));
    }

    #[tokio::test]
    async fn non_url_commands_complete_without_a_request() {
        let mut transport = WebTransport::new("http://lights.local").expect("client builds");
        assert!(transport.open().await.is_ok());
        assert!(transport.write(b"S6").await.is_ok());
        assert_eq!(transport.describe(), "http://lights.local");
    }
}
