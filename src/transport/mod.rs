//! Transports the dispatch client can run over
//!
//! - `tcp`: persistent framed TCP link with reconnection
//! - `channel`: in-process link for embedded modules and tests

pub mod channel;
pub mod tcp;
pub mod traits;

pub use channel::{channel_transport, ChannelTransport, RemoteEnd};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use traits::{Transport, TransportEvent};
