//! Command dispatch client shared by every module facade

use super::pending::PendingTable;
use super::request::CommandRequest;
use crate::config::{ClientConfig, ConfigError};
use crate::error::{CommandOutcome, DispatchError};
use crate::transport::{Transport, TransportEvent};
use dispatch_shared::Reply;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Turns command invocations into timeout-bounded outcomes.
///
/// Cheap to clone; all clones share one pending table and one transport.
#[derive(Clone)]
pub struct DispatchClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Box<dyn Transport>,
    config: ClientConfig,
    call_id: AtomicU64,
    pending: Arc<PendingTable>,
    /// Set by `shutdown` or when the transport event stream ends
    closed: Arc<AtomicBool>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchClient {
    /// Bind a client to a transport and start routing its events
    pub fn new<T: Transport>(
        transport: T,
        events: mpsc::Receiver<TransportEvent>,
        config: ClientConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let pending = Arc::new(PendingTable::default());
        let closed = Arc::new(AtomicBool::new(false));
        let name = transport.name();

        let router = tokio::spawn(route_events(events, pending.clone(), closed.clone(), name));

        info!(
            "Dispatch client bound to {} transport (default timeout {:?})",
            name, config.default_timeout
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport: Box::new(transport),
                config,
                call_id: AtomicU64::new(0),
                pending,
                closed,
                router: Mutex::new(Some(router)),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst) && self.inner.transport.is_connected()
    }

    /// Number of calls still awaiting settlement
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Send `command` to `module` and wait for its outcome.
    ///
    /// `params` of `None` or `null` means no parameters; `timeout` of `None`
    /// applies the client default.
    pub async fn send_command(
        &self,
        command: &str,
        module: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> CommandOutcome {
        let mut request = CommandRequest::new(command, module)?;
        if let Some(params) = params {
            request = request.with_params(params)?;
        }
        if let Some(timeout) = timeout {
            request = request.with_timeout(timeout)?;
        }
        self.dispatch(request).await
    }

    /// Dispatch an already validated request
    pub async fn dispatch(&self, request: CommandRequest) -> CommandOutcome {
        let inner = &self.inner;

        if inner.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::NotConnected("client is shut down".into()));
        }
        if !inner.transport.is_connected() {
            return Err(DispatchError::NotConnected(format!(
                "{} transport is disconnected",
                inner.transport.name()
            )));
        }

        let timeout = request.timeout().unwrap_or(inner.config.default_timeout);
        let call_id = self.next_call_id();
        let frame = request
            .to_frame(call_id, inner.config.absent_params)
            .map_err(|e| DispatchError::InvalidRequest(format!("unencodable parameters: {}", e)))?;

        let mut outcome = inner
            .pending
            .register(call_id, request.command(), request.module(), timeout);

        // A shutdown racing with registration must not leave this call to
        // wait for its timer.
        if inner.closed.load(Ordering::SeqCst) {
            inner.pending.settle(
                call_id,
                Err(DispatchError::NotConnected("client is shut down".into())),
            );
        } else {
            debug!(
                "Sending call {} ({}.{}) timeout={:?}",
                call_id,
                request.module(),
                request.command(),
                timeout
            );

            // The timer is already armed, so a send that stalls still ends
            // in a settlement.
            let send = inner.transport.send(frame);
            tokio::pin!(send);
            tokio::select! {
                sent = &mut send => {
                    if let Err(e) = sent {
                        warn!("Failed to send call {}: {}", call_id, e);
                        inner.pending.settle(
                            call_id,
                            Err(DispatchError::TransportFailure(format!("send failed: {}", e))),
                        );
                    }
                }
                settled = &mut outcome => return unwrap_settled(call_id, settled),
            }
        }

        unwrap_settled(call_id, outcome.await)
    }

    /// Tear the client down: every pending call fails with
    /// `TransportFailure`, later calls get `NotConnected`.
    ///
    /// Returns the number of calls that were force-settled.
    pub fn shutdown(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(router) = self.inner.take_router() {
            router.abort();
        }

        let failed = self
            .inner
            .pending
            .fail_all(&DispatchError::TransportFailure("client shut down".into()));
        info!("Dispatch client shut down ({} pending calls failed)", failed);
        failed
    }

    fn next_call_id(&self) -> u64 {
        self.inner.call_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl ClientInner {
    fn take_router(&self) -> Option<JoinHandle<()>> {
        match self.router.lock() {
            Ok(mut router) => router.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(router) = self.take_router() {
            router.abort();
        }
    }
}

fn unwrap_settled(
    call_id: u64,
    settled: Result<CommandOutcome, oneshot::error::RecvError>,
) -> CommandOutcome {
    match settled {
        Ok(outcome) => outcome,
        Err(_) => Err(DispatchError::TransportFailure(format!(
            "call {} was dropped without an outcome",
            call_id
        ))),
    }
}

/// Settle pending calls from transport events until the stream ends
async fn route_events(
    mut events: mpsc::Receiver<TransportEvent>,
    pending: Arc<PendingTable>,
    closed: Arc<AtomicBool>,
    transport: &'static str,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                info!("{} transport connected", transport);
            }
            TransportEvent::Disconnected { reason } => {
                let failed = pending.fail_all(&DispatchError::TransportFailure(format!(
                    "{} transport disconnected: {}",
                    transport, reason
                )));
                warn!(
                    "{} transport disconnected ({}), {} pending calls failed",
                    transport, reason, failed
                );
            }
            TransportEvent::Response(response) => {
                let call_id = response.call_id;
                let outcome = match response.reply() {
                    Ok(Reply::Success(data)) => Ok(data),
                    Ok(Reply::Failure { message, data }) => {
                        Err(DispatchError::Remote { message, data })
                    }
                    Err(e) => Err(DispatchError::TransportFailure(format!(
                        "undecodable response payload: {}",
                        e
                    ))),
                };

                if !pending.settle(call_id, outcome) {
                    debug!("Discarding response for unknown or settled call {}", call_id);
                }
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let failed = pending.fail_all(&DispatchError::TransportFailure(format!(
        "{} transport event stream closed",
        transport
    )));
    warn!(
        "{} transport went away, {} pending calls failed",
        transport, failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AbsentParams;
    use crate::error::ErrorKind;
    use crate::transport::{channel_transport, RemoteEnd};
    use dispatch_shared::{defaults, Response};
    use serde_json::json;
    use tokio::time::Instant;

    fn connected_client(config: ClientConfig) -> (DispatchClient, RemoteEnd) {
        let (transport, events, remote) = channel_transport(true);
        let client = DispatchClient::new(transport, events, config).unwrap();
        (client, remote)
    }

    fn spawn_call(
        client: &DispatchClient,
        command: &'static str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> JoinHandle<CommandOutcome> {
        let client = client.clone();
        tokio::spawn(async move { client.send_command(command, "audio", params, timeout).await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_volumes_success() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let call = spawn_call(
            &client,
            "set_volumes",
            Some(json!({"playback": 50, "capture": 70})),
            None,
        );

        let request = remote.next_request().await.unwrap();
        assert_eq!(request.command, "set_volumes");
        assert_eq!(request.module, "audio");
        assert_eq!(
            request.decode_params().unwrap(),
            Some(json!({"playback": 50, "capture": 70}))
        );

        let payload = json!({"playback": 50, "capture": 70});
        remote
            .respond(Response::success(request.call_id, &payload).unwrap())
            .await
            .unwrap();

        assert_eq!(call.await.unwrap(), Ok(payload));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies_without_override() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let start = Instant::now();
        let call = spawn_call(&client, "test_playing", None, None);

        remote.next_request().await.unwrap();
        tokio::time::sleep(defaults::COMMAND_TIMEOUT - Duration::from_millis(1)).await;
        assert!(!call.is_finished());
        assert_eq!(client.pending_count(), 1);

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        let elapsed = start.elapsed();
        assert!(elapsed >= defaults::COMMAND_TIMEOUT);
        assert!(elapsed < defaults::COMMAND_TIMEOUT + Duration::from_millis(100));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_timeout_overrides_default() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let start = Instant::now();
        let call = spawn_call(
            &client,
            "select_device",
            Some(json!({"driver_name": "hdmi0"})),
            Some(Duration::from_secs(30)),
        );

        remote.next_request().await.unwrap();
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!call.is_finished());

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            DispatchError::Timeout {
                command: "select_device".into(),
                module: "audio".into(),
                timeout: Duration::from_secs(30),
            }
        );
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_connected_registers_nothing() {
        let (transport, events, mut remote) = channel_transport(false);
        let client = DispatchClient::new(transport, events, ClientConfig::default()).unwrap();

        let err = client
            .send_command("test_recording", "audio", None, Some(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(client.pending_count(), 0);
        assert!(remote.try_next_request().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_succeed_after_reconnect() {
        let (transport, events, mut remote) = channel_transport(false);
        let client = DispatchClient::new(transport, events, ClientConfig::default()).unwrap();
        assert!(!client.is_connected());

        remote.connect().await.unwrap();
        assert!(client.is_connected());

        let call = spawn_call(&client, "test_playing", None, None);
        let request = remote.next_request().await.unwrap();
        remote
            .respond(Response::success(request.call_id, &json!(true)).unwrap())
            .await
            .unwrap();
        assert_eq!(call.await.unwrap(), Ok(json!(true)));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_never_reaches_transport() {
        let (client, mut remote) = connected_client(ClientConfig::default());

        let err = client.send_command("", "audio", None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = client
            .send_command("test_playing", "", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = client
            .send_command("test_playing", "audio", None, Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        assert_eq!(client.pending_count(), 0);
        assert!(remote.try_next_request().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_passes_through() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let call = spawn_call(
            &client,
            "select_device",
            Some(json!({"driver_name": "nope"})),
            None,
        );

        let request = remote.next_request().await.unwrap();
        let detail = json!({"driver_name": "nope"});
        remote
            .respond(
                Response::failure(
                    request.call_id,
                    "Specified driver does not exist",
                    Some(&detail),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            call.await.unwrap(),
            Err(DispatchError::Remote {
                message: "Specified driver does not exist".into(),
                data: Some(detail),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_responses_matched_by_call_id() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let first = spawn_call(&client, "test_playing", None, None);
        let first_req = remote.next_request().await.unwrap();
        let second = spawn_call(&client, "test_recording", None, None);
        let second_req = remote.next_request().await.unwrap();
        assert_ne!(first_req.call_id, second_req.call_id);

        remote
            .respond(Response::success(second_req.call_id, &json!("recorded")).unwrap())
            .await
            .unwrap();
        assert_eq!(second.await.unwrap(), Ok(json!("recorded")));
        assert!(!first.is_finished());

        remote
            .respond(Response::success(first_req.call_id, &json!("played")).unwrap())
            .await
            .unwrap();
        assert_eq!(first.await.unwrap(), Ok(json!("played")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_does_not_hold_back_fast_call() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let start = Instant::now();

        let slow = spawn_call(&client, "select_device", None, Some(Duration::from_secs(30)));
        remote.next_request().await.unwrap();
        let fast = spawn_call(&client, "test_playing", None, None);
        let fast_req = remote.next_request().await.unwrap();

        remote
            .respond(Response::success(fast_req.call_id, &json!(true)).unwrap())
            .await
            .unwrap();
        assert_eq!(fast.await.unwrap(), Ok(json!(true)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(client.pending_count(), 1);

        let err = slow.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_pending_calls() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let call = spawn_call(&client, "test_recording", None, Some(Duration::from_secs(10)));
        remote.next_request().await.unwrap();

        remote.disconnect("cable pulled").await.unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(client.pending_count(), 0);
        assert!(!client.is_connected());

        let err = client
            .send_command("test_playing", "audio", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_is_discarded() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let call = spawn_call(&client, "test_playing", None, Some(Duration::from_secs(1)));
        let late = remote.next_request().await.unwrap();

        assert_eq!(call.await.unwrap().unwrap_err().kind(), ErrorKind::Timeout);

        remote
            .respond(Response::success(late.call_id, &json!(true)).unwrap())
            .await
            .unwrap();

        let next = spawn_call(&client, "test_playing", None, None);
        let request = remote.next_request().await.unwrap();
        assert_ne!(request.call_id, late.call_id);
        remote
            .respond(Response::success(request.call_id, &json!("fresh")).unwrap())
            .await
            .unwrap();
        assert_eq!(next.await.unwrap(), Ok(json!("fresh")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_calls_are_independent() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let params = json!({"playback": 10, "capture": 10});
        let a = spawn_call(&client, "set_volumes", Some(params.clone()), None);
        let first = remote.next_request().await.unwrap();
        let b = spawn_call(&client, "set_volumes", Some(params), None);
        let second = remote.next_request().await.unwrap();

        assert_ne!(first.call_id, second.call_id);
        assert_eq!(client.pending_count(), 2);

        remote
            .respond(Response::success(first.call_id, &json!(1)).unwrap())
            .await
            .unwrap();
        remote
            .respond(Response::failure(second.call_id, "busy", None).unwrap())
            .await
            .unwrap();

        assert_eq!(a.await.unwrap(), Ok(json!(1)));
        assert_eq!(b.await.unwrap().unwrap_err().kind(), ErrorKind::RemoteError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_is_still_removed() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let call = spawn_call(&client, "test_playing", None, Some(Duration::from_secs(2)));
        remote.next_request().await.unwrap();
        call.abort();

        assert_eq!(client.pending_count(), 1);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_settles_everything() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let call = spawn_call(&client, "test_recording", None, Some(Duration::from_secs(10)));
        remote.next_request().await.unwrap();

        assert_eq!(client.shutdown(), 1);
        assert_eq!(call.await.unwrap().unwrap_err().kind(), ErrorKind::TransportFailure);

        let err = client
            .send_command("test_playing", "audio", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert!(remote.try_next_request().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_event_stream_fails_pending() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let call = spawn_call(&client, "test_playing", None, None);
        remote.next_request().await.unwrap();

        drop(remote);

        assert_eq!(call.await.unwrap().unwrap_err().kind(), ErrorKind::TransportFailure);
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_response_maps_to_transport_failure() {
        let (client, mut remote) = connected_client(ClientConfig::default());
        let call = spawn_call(&client, "test_playing", None, None);
        let request = remote.next_request().await.unwrap();

        remote
            .respond(Response {
                call_id: request.call_id,
                ok: true,
                data: b"{oops".to_vec(),
                message: String::new(),
            })
            .await
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap_err().kind(), ErrorKind::TransportFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_omitted_params_configuration() {
        let (client, mut remote) = connected_client(ClientConfig {
            absent_params: AbsentParams::Omit,
            ..Default::default()
        });
        let _call = spawn_call(&client, "test_playing", None, None);
        let request = remote.next_request().await.unwrap();
        assert!(request.params.is_none());

        let (client, mut remote) = connected_client(ClientConfig::default());
        let _call = spawn_call(&client, "test_playing", None, None);
        let request = remote.next_request().await.unwrap();
        assert_eq!(request.decode_params().unwrap(), Some(json!({})));
    }

    /// Connected link whose `send` either hangs or fails outright
    struct BrokenTransport {
        hang: bool,
    }

    #[async_trait::async_trait]
    impl Transport for BrokenTransport {
        async fn send(&self, _request: dispatch_shared::Request) -> anyhow::Result<()> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(anyhow::anyhow!("socket buffer rejected frame"))
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn broken_client(hang: bool) -> (DispatchClient, mpsc::Sender<TransportEvent>) {
        let (event_tx, events) = mpsc::channel(8);
        let client =
            DispatchClient::new(BrokenTransport { hang }, events, ClientConfig::default()).unwrap();
        (client, event_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_still_times_out() {
        let (client, _events) = broken_client(true);
        let start = Instant::now();

        let err = client
            .send_command("test_recording", "audio", None, Some(Duration::from_secs(10)))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(10) + Duration::from_millis(100));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_settles_immediately() {
        let (client, _events) = broken_client(false);
        let start = Instant::now();

        let err = client
            .send_command("set_volumes", "audio", Some(json!({"playback": 10, "capture": 10})), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert!(err.message().contains("socket buffer rejected frame"));
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(client.pending_count(), 0);

        // The aborted timer must not resurrect the call later.
        tokio::time::sleep(defaults::COMMAND_TIMEOUT * 2).await;
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_default_timeout_rejected() {
        let (transport, events, _remote) = channel_transport(true);
        let result = DispatchClient::new(
            transport,
            events,
            ClientConfig {
                default_timeout: Duration::ZERO,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(ConfigError::ZeroTimeout)));
    }
}
