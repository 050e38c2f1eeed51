//! Validated command invocation

use crate::config::AbsentParams;
use crate::error::DispatchError;
use dispatch_shared::Request;
use serde_json::{Map, Value};
use std::time::Duration;

/// A command addressed to a module. Construction validates the call, so a
/// `CommandRequest` that exists is always fit to put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    command: String,
    module: String,
    params: Option<Map<String, Value>>,
    timeout: Option<Duration>,
}

impl CommandRequest {
    pub fn new(
        command: impl Into<String>,
        module: impl Into<String>,
    ) -> Result<Self, DispatchError> {
        let command = command.into();
        let module = module.into();

        if command.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("command is missing".into()));
        }
        if module.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(format!(
                "module is missing for command {}",
                command
            )));
        }

        Ok(Self {
            command,
            module,
            params: None,
            timeout: None,
        })
    }

    /// Attach parameters. `null` means "no parameters"; anything other than
    /// an object is rejected.
    pub fn with_params(mut self, params: Value) -> Result<Self, DispatchError> {
        self.params = match params {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                return Err(DispatchError::InvalidRequest(format!(
                    "parameters for {}.{} must be an object, got {}",
                    self.module, self.command, other
                )))
            }
        };
        Ok(self)
    }

    /// Override the client's default timeout for this call
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, DispatchError> {
        if timeout.is_zero() {
            return Err(DispatchError::InvalidRequest(format!(
                "timeout for {}.{} must be positive",
                self.module, self.command
            )));
        }
        self.timeout = Some(timeout);
        Ok(self)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn params(&self) -> Option<&Map<String, Value>> {
        self.params.as_ref()
    }

    /// Per-call override; `None` means the client default applies
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn to_frame(
        &self,
        call_id: u64,
        absent: AbsentParams,
    ) -> Result<Request, serde_json::Error> {
        let params = match (&self.params, absent) {
            (Some(map), _) => Some(Value::Object(map.clone())),
            (None, AbsentParams::EmptyObject) => Some(Value::Object(Map::new())),
            (None, AbsentParams::Omit) => None,
        };
        Request::new(call_id, &self.command, &self.module, params.as_ref())
    }
}
