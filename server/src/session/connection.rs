//! Individual client session handling

use crate::command::ModuleRegistry;
use anyhow::Result;
use dispatch_shared::{
    codec::{self, FrameDecoder},
    envelope, Envelope,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Handle to write frames to a client; clones share one writer
#[derive(Clone)]
pub struct SessionHandle {
    pub addr: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    pub connected_at: Instant,
}

impl SessionHandle {
    /// Send an envelope to this client
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let encoded = codec::encode(envelope)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        Ok(())
    }
}

/// Active client session
pub struct ModuleSession {
    handle: SessionHandle,
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl ModuleSession {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();

        let handle = SessionHandle {
            addr,
            writer: Arc::new(Mutex::new(writer)),
            connected_at: Instant::now(),
        };

        Self {
            handle,
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Get a cloneable handle for sending frames
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Read the next envelope. Returns None once the connection is closed or
    /// the stream is corrupt.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(envelope)) => return Some(envelope),
                Ok(None) => {}
                Err(e) => {
                    warn!("Decode error from {}: {}", self.handle.addr, e);
                    return None;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!("Read error from {}: {}", self.handle.addr, e);
                    return None;
                }
            }
        }
    }
}

/// Serve one client until it disconnects.
///
/// Each request runs in its own task, so a slow command never holds back the
/// responses of faster ones.
pub async fn serve(mut session: ModuleSession, registry: Arc<ModuleRegistry>) {
    let handle = session.handle();

    while let Some(envelope) = session.recv().await {
        match envelope.payload {
            Some(envelope::Payload::Request(request)) => {
                debug!(
                    "[{}] call={} {}.{}",
                    handle.addr, request.call_id, request.module, request.command
                );
                let handle = handle.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    let response = registry.handle_request(&request).await;
                    if let Err(e) = handle.send(&Envelope::response(response)).await {
                        warn!(
                            "Failed to answer call {} on {}: {}",
                            request.call_id, handle.addr, e
                        );
                    }
                });
            }
            Some(envelope::Payload::Response(response)) => {
                warn!(
                    "[{}] unexpected response for call {} (clients should not answer)",
                    handle.addr, response.call_id
                );
            }
            None => debug!("[{}] empty frame", handle.addr),
        }
    }

    info!(
        "Client disconnected: {} (session lasted {:?})",
        handle.addr,
        handle.connected_at.elapsed()
    );
}
