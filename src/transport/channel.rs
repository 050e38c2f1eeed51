//! In-process transport backed by tokio channels

use crate::transport::traits::{Transport, TransportEvent};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dispatch_shared::{Request, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const EVENT_CAPACITY: usize = 100;

/// Client side of an in-process link
pub struct ChannelTransport {
    connected: Arc<AtomicBool>,
    requests: mpsc::UnboundedSender<Request>,
}

/// Module side of an in-process link
pub struct RemoteEnd {
    connected: Arc<AtomicBool>,
    requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::Sender<TransportEvent>,
}

/// Create a linked transport/remote pair and the client's event stream
pub fn channel_transport(
    connected: bool,
) -> (ChannelTransport, mpsc::Receiver<TransportEvent>, RemoteEnd) {
    let flag = Arc::new(AtomicBool::new(connected));
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

    let transport = ChannelTransport {
        connected: flag.clone(),
        requests: req_tx,
    };
    let remote = RemoteEnd {
        connected: flag,
        requests: req_rx,
        events: event_tx,
    };

    (transport, event_rx, remote)
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, request: Request) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("Channel disconnected"));
        }
        self.requests
            .send(request)
            .map_err(|_| anyhow!("Remote end dropped"))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

impl RemoteEnd {
    /// Wait for the next request the client sent
    pub async fn next_request(&mut self) -> Option<Request> {
        self.requests.recv().await
    }

    /// Take a request if one is already queued
    pub fn try_next_request(&mut self) -> Option<Request> {
        self.requests.try_recv().ok()
    }

    pub async fn respond(&self, response: Response) -> Result<()> {
        self.events
            .send(TransportEvent::Response(response))
            .await
            .map_err(|_| anyhow!("Client event stream closed"))
    }

    pub async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Connected).await
    }

    pub async fn disconnect(&self, reason: impl Into<String>) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Disconnected {
            reason: reason.into(),
        })
        .await
    }

    async fn emit(&self, event: TransportEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| anyhow!("Client event stream closed"))
    }
}
