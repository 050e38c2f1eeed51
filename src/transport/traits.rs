//! Transport abstraction consumed by the dispatch client

use anyhow::Result;
use async_trait::async_trait;
use dispatch_shared::{Request, Response};

/// Events a transport reports back to the client
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Link is up
    Connected,
    /// Link dropped; anything in flight will not be answered
    Disconnected { reason: String },
    /// A response correlated by its call id
    Response(Response),
}

/// An already-connected channel to a module server.
///
/// Implementations deliver [`TransportEvent`]s through the receiver returned
/// by their constructor; the stream ending means the transport is gone.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hand a request frame to the link
    async fn send(&self, request: Request) -> Result<()>;

    /// Current connection state
    fn is_connected(&self) -> bool;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
