//! Persistent TCP link to a module server with automatic reconnection

use crate::transport::traits::{Transport, TransportEvent};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dispatch_shared::{
    codec::{self, FrameDecoder},
    defaults, envelope, Envelope, Request,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Environment variable overriding the server address
pub const ENV_SERVER_ADDR: &str = "DISPATCH_SERVER";

const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Module server address
    pub address: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            address: defaults::SERVER_ADDR.into(),
            reconnect_delay: defaults::RECONNECT_DELAY,
            max_reconnect_delay: defaults::MAX_RECONNECT_DELAY,
            connect_timeout: defaults::CONNECT_TIMEOUT,
        }
    }
}

impl TcpTransportConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(address) = std::env::var(ENV_SERVER_ADDR) {
            config.address = address;
        }
        config
    }
}

/// TCP transport; the connection loop runs in a background task
pub struct TcpTransport {
    outbound_tx: mpsc::Sender<Envelope>,
    state: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl TcpTransport {
    /// Start the connection loop and return the transport with its event stream
    pub fn connect(config: TcpTransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            connection_loop(config, outbound_rx, event_tx, state_tx).await;
        });

        let transport = Self {
            outbound_tx,
            state: state_rx,
            task,
        };
        (transport, event_rx)
    }

    /// Wait until the link is up, for at most `within`
    pub async fn wait_connected(&self, within: Duration) -> Result<()> {
        let mut state = self.state.clone();
        let result = timeout(within, state.wait_for(|connected| *connected))
            .await
            .map(|changed| changed.map(|_| ()));
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(anyhow!("Connection loop stopped")),
            Err(_) => Err(anyhow!("Not connected within {:?}", within)),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, request: Request) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("Not connected"));
        }
        self.outbound_tx
            .send(Envelope::request(request))
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Connect, serve the link until it drops, back off, repeat
async fn connection_loop(
    config: TcpTransportConfig,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    event_tx: mpsc::Sender<TransportEvent>,
    state_tx: watch::Sender<bool>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match timeout(config.connect_timeout, TcpStream::connect(&config.address)).await {
            Ok(Ok(stream)) => {
                reconnect_delay = config.reconnect_delay;

                // Frames queued while the link was down belong to calls the
                // disconnect already settled.
                let stale = discard_queued(&mut outbound_rx);
                if stale > 0 {
                    warn!("Discarded {} frames queued while disconnected", stale);
                }

                let _ = state_tx.send(true);
                info!("Connected to module server at {}", config.address);
                if event_tx.send(TransportEvent::Connected).await.is_err() {
                    return;
                }

                let reason = match handle_connection(stream, &mut outbound_rx, &event_tx).await {
                    Ok(()) => {
                        debug!("Transport owner went away, stopping connection loop");
                        let _ = state_tx.send(false);
                        return;
                    }
                    Err(e) => e.to_string(),
                };

                let _ = state_tx.send(false);
                warn!("Disconnected from {}: {}", config.address, reason);
                if event_tx
                    .send(TransportEvent::Disconnected { reason })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(Err(e)) => {
                debug!("Connect to {} failed: {}", config.address, e);
            }
            Err(_) => {
                debug!("Connect to {} timed out", config.address);
            }
        }

        if event_tx.is_closed() {
            return;
        }

        tokio::time::sleep(reconnect_delay).await;
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }
}

fn discard_queued(outbound_rx: &mut mpsc::Receiver<Envelope>) -> usize {
    let mut count = 0;
    while outbound_rx.try_recv().is_ok() {
        count += 1;
    }
    count
}

/// Serve one established connection.
///
/// Returns `Ok(())` when the local side has gone away and `Err` when the link
/// itself failed.
async fn handle_connection(
    stream: TcpStream,
    outbound_rx: &mut mpsc::Receiver<Envelope>,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(envelope) = outbound else {
                    return Ok(());
                };
                let encoded = codec::encode(&envelope)?;
                writer.write_all(&encoded).await?;
            }

            result = reader.read(&mut read_buf) => {
                let n = match result {
                    Ok(0) => return Err(anyhow!("Server closed connection")),
                    Ok(n) => n,
                    Err(e) => return Err(anyhow!("Read error: {}", e)),
                };
                decoder.extend(&read_buf[..n]);

                while let Some(envelope) = decoder
                    .decode_next()
                    .map_err(|e| anyhow!("Frame decode error: {}", e))?
                {
                    match envelope.payload {
                        Some(envelope::Payload::Response(response)) => {
                            if event_tx.send(TransportEvent::Response(response)).await.is_err() {
                                return Ok(());
                            }
                        }
                        Some(envelope::Payload::Request(request)) => {
                            warn!(
                                "Ignoring request {} from server ({}.{})",
                                request.call_id, request.module, request.command
                            );
                        }
                        None => debug!("Received empty frame"),
                    }
                }
            }
        }
    }
}
