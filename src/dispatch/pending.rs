//! Bookkeeping for calls awaiting a response

use crate::error::{CommandOutcome, DispatchError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A submitted call that has not settled yet
struct PendingCall {
    command: String,
    module: String,
    timeout: Duration,
    submitted_at: Instant,
    responder: oneshot::Sender<CommandOutcome>,
    timer: AbortHandle,
}

/// Outstanding calls by call id.
///
/// Removing an entry is what settles a call, so whichever path removes it
/// first (response, timer, disconnect, shutdown) delivers the only outcome.
#[derive(Default)]
pub(crate) struct PendingTable {
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingTable {
    /// Register a call and arm its timeout.
    ///
    /// The timer is spawned while the table is locked, so it cannot look the
    /// call up before the entry exists.
    pub fn register(
        self: &Arc<Self>,
        call_id: u64,
        command: &str,
        module: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<CommandOutcome> {
        let (responder, outcome) = oneshot::channel();
        let mut calls = self.lock();

        let table = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.expire(call_id);
        })
        .abort_handle();

        calls.insert(
            call_id,
            PendingCall {
                command: command.to_string(),
                module: module.to_string(),
                timeout,
                submitted_at: Instant::now(),
                responder,
                timer,
            },
        );

        outcome
    }

    /// Settle a call; returns false if it was unknown or already settled
    pub fn settle(&self, call_id: u64, outcome: CommandOutcome) -> bool {
        let Some(call) = self.take(call_id) else {
            return false;
        };
        call.timer.abort();
        debug!(
            "Call {} ({}.{}) settled after {:?}",
            call_id,
            call.module,
            call.command,
            call.submitted_at.elapsed()
        );
        let _ = call.responder.send(outcome);
        true
    }

    /// Settle every outstanding call with `error`
    pub fn fail_all(&self, error: &DispatchError) -> usize {
        let drained: Vec<(u64, PendingCall)> = self.lock().drain().collect();
        let count = drained.len();

        for (call_id, call) in drained {
            call.timer.abort();
            debug!(
                "Call {} ({}.{}) failed: {}",
                call_id, call.module, call.command, error
            );
            let _ = call.responder.send(Err(error.clone()));
        }

        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn contains(&self, call_id: u64) -> bool {
        self.lock().contains_key(&call_id)
    }

    fn expire(&self, call_id: u64) {
        let Some(call) = self.take(call_id) else {
            return;
        };
        warn!(
            "Call {} ({}.{}) timed out after {:?}",
            call_id, call.module, call.command, call.timeout
        );
        let _ = call.responder.send(Err(DispatchError::Timeout {
            command: call.command,
            module: call.module,
            timeout: call.timeout,
        }));
    }

    fn take(&self, call_id: u64) -> Option<PendingCall> {
        self.lock().remove(&call_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
