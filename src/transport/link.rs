//! Port link: exclusive owner of one transport
//!
//! The session never awaits its transport. It posts [`LinkRequest`]s to a
//! worker task which applies them strictly in order and answers with
//! [`LinkEvent`]s. Inside the worker the link is a statum typestate machine,
//! so a write on a closed port is a type-level impossibility and has to be
//! answered explicitly.

use statum::{machine, state, transition};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{Transport, TransportError};

/// Completion reported back to the owning session
#[derive(Debug)]
pub enum LinkEvent {
    Opened(Result<(), TransportError>),
    WriteComplete(Result<(), TransportError>),
}

#[derive(Debug)]
enum LinkRequest {
    Open,
    Write(String),
    Close,
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Closed,
    Open,
}

#[machine]
pub struct PortLink<LinkState> {
    transport: Box<dyn Transport>,
    player: u8,
}

impl<S: LinkStateTrait> PortLink<S> {
    pub fn describe(&self) -> &str {
        self.transport.describe()
    }
}

impl PortLink<Closed> {
    pub fn create(transport: Box<dyn Transport>, player: u8) -> Self {
        Self::builder().transport(transport).player(player).build()
    }
}

#[transition]
impl PortLink<Closed> {
    /// Try to open; on failure the closed link comes back with the error
    pub async fn open(mut self) -> Result<PortLink<Open>, (Self, TransportError)> {
        debug!("P{} opening {}", self.player, self.describe());
        match self.transport.open().await {
            Ok(()) => Ok(self.transition()),
            Err(e) => Err((self, e)),
        }
    }
}

impl PortLink<Open> {
    pub async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.transport.write(command.as_bytes()).await
    }
}

#[transition]
impl PortLink<Open> {
    pub async fn close(mut self) -> PortLink<Closed> {
        self.transport.close().await;
        info!("P{} closed {}", self.player, self.describe());
        self.transition()
    }
}

enum LinkSlot {
    Closed(PortLink<Closed>),
    Open(PortLink<Open>),
}

/// Session-side end of a link worker
#[derive(Debug)]
pub struct LinkHandle {
    requests: mpsc::UnboundedSender<LinkRequest>,
    port: String,
}

impl LinkHandle {
    /// Move `transport` into a new worker task
    ///
    /// Completions arrive on `events`. The worker closes the transport and
    /// exits once this handle is dropped.
    pub fn spawn(
        transport: Box<dyn Transport>,
        player: u8,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        let port = transport.describe().to_string();
        let (requests, request_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(
            PortLink::create(transport, player),
            player,
            request_rx,
            events,
        ));
        Self { requests, port }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn open(&self) {
        self.request(LinkRequest::Open);
    }

    pub fn write(&self, command: String) {
        self.request(LinkRequest::Write(command));
    }

    pub fn close(&self) {
        self.request(LinkRequest::Close);
    }

    fn request(&self, request: LinkRequest) {
        if let Err(e) = self.requests.send(request) {
            error!("Link worker for {} is gone, dropped {:?}", self.port, e.0);
        }
    }
}

async fn run_link(
    link: PortLink<Closed>,
    player: u8,
    mut requests: mpsc::UnboundedReceiver<LinkRequest>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let notify = |event: LinkEvent| {
        if events.send(event).is_err() {
            debug!("P{} session stopped listening to its link", player);
        }
    };

    let mut slot = LinkSlot::Closed(link);
    while let Some(request) = requests.recv().await {
        slot = match (slot, request) {
            (LinkSlot::Closed(link), LinkRequest::Open) => match link.open().await {
                Ok(open) => {
                    notify(LinkEvent::Opened(Ok(())));
                    LinkSlot::Open(open)
                }
                Err((closed, e)) => {
                    notify(LinkEvent::Opened(Err(e)));
                    LinkSlot::Closed(closed)
                }
            },
            (LinkSlot::Open(open), LinkRequest::Open) => {
                notify(LinkEvent::Opened(Ok(())));
                LinkSlot::Open(open)
            }
            (LinkSlot::Open(mut open), LinkRequest::Write(command)) => {
                let result = open.write(&command).await;
                if let Err(e) = &result {
                    warn!("P{} write of {} failed: {}", player, command, e);
                }
                notify(LinkEvent::WriteComplete(result));
                LinkSlot::Open(open)
            }
            (LinkSlot::Closed(closed), LinkRequest::Write(command)) => {
                debug!("P{} write of {} on a closed link", player, command);
                notify(LinkEvent::WriteComplete(Err(TransportError::NotOpen)));
                LinkSlot::Closed(closed)
            }
            (LinkSlot::Open(open), LinkRequest::Close) => LinkSlot::Closed(open.close().await),
            (LinkSlot::Closed(closed), LinkRequest::Close) => LinkSlot::Closed(closed),
        };
    }

    if let LinkSlot::Open(open) = slot {
        open.close().await;
    }
    debug!("P{} link worker finished", player);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, Recorder};

    #[tokio::test]
    async fn requests_are_applied_in_order() {
        let recorder = Recorder::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = LinkHandle::spawn(Box::new(MockTransport::healthy(&recorder)), 1, tx);

        link.open();
        link.write("S6".to_string());
        link.write("F0.1.1".to_string());
        link.close();
        link.write("E".to_string());

        assert!(matches!(rx.recv().await, Some(LinkEvent::Opened(Ok(())))));
        assert!(matches!(rx.recv().await, Some(LinkEvent::WriteComplete(Ok(())))));
        assert!(matches!(rx.recv().await, Some(LinkEvent::WriteComplete(Ok(())))));
        assert!(matches!(
            rx.recv().await,
            Some(LinkEvent::WriteComplete(Err(TransportError::NotOpen)))
        ));
        assert_eq!(recorder.entries(), ["open", "write S6", "write F0.1.1", "close"]);
    }

    #[tokio::test]
    async fn failed_open_leaves_the_link_closed() {
        let recorder = Recorder::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = LinkHandle::spawn(Box::new(MockTransport::unreachable(&recorder)), 2, tx);

        link.open();
        link.write("S6".to_string());

        assert!(matches!(rx.recv().await, Some(LinkEvent::Opened(Err(_)))));
        assert!(matches!(
            rx.recv().await,
            Some(LinkEvent::WriteComplete(Err(TransportError::NotOpen)))
        ));
        assert_eq!(link.port(), "COM9");
    }

    #[tokio::test]
    async fn dropping_the_handle_closes_an_open_port() {
        let recorder = Recorder::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = LinkHandle::spawn(Box::new(MockTransport::healthy(&recorder)), 1, tx);
        link.open();
        assert!(matches!(rx.recv().await, Some(LinkEvent::Opened(Ok(())))));

        drop(link);
        assert!(rx.recv().await.is_none());
        assert_eq!(recorder.count("close"), 1);
    }
}
