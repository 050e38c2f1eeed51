//! Shared wire types for module command dispatch
//!
//! This crate provides the frame types and codec used between a dispatch
//! client and a module server. Frames are protobuf messages; parameter and
//! result bodies travel inside them as JSON documents.

pub mod codec;
pub mod proto;

pub use proto::*;

use serde_json::Value;

/// Default values shared by clients and servers
pub mod defaults {
    use std::time::Duration;

    /// Timeout applied to a command when the caller supplies none
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

    /// Initial delay before reconnecting a dropped link
    pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

    /// Upper bound for the reconnect backoff
    pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

    /// Time allowed for establishing a connection
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default module server address
    pub const SERVER_ADDR: &str = "127.0.0.1:8080";
}

/// Decoded body of a [`Response`]
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The remote command succeeded with this payload
    Success(Value),
    /// The remote command failed; `data` is passed through untouched
    Failure { message: String, data: Option<Value> },
}

impl Envelope {
    /// Wrap a request
    pub fn request(request: Request) -> Self {
        Self {
            payload: Some(envelope::Payload::Request(request)),
        }
    }

    /// Wrap a response
    pub fn response(response: Response) -> Self {
        Self {
            payload: Some(envelope::Payload::Response(response)),
        }
    }
}

impl Request {
    /// Build a request frame. `params` of `None` leaves the field off the wire.
    pub fn new(
        call_id: u64,
        command: impl Into<String>,
        module: impl Into<String>,
        params: Option<&Value>,
    ) -> Result<Self, serde_json::Error> {
        let params = params.map(serde_json::to_vec).transpose()?;
        Ok(Self {
            call_id,
            command: command.into(),
            module: module.into(),
            params,
        })
    }

    /// Decode the parameter body, if one was supplied
    pub fn decode_params(&self) -> Result<Option<Value>, serde_json::Error> {
        self.params
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
    }
}

impl Response {
    /// Response for a command that succeeded
    pub fn success(call_id: u64, data: &Value) -> Result<Self, serde_json::Error> {
        Ok(Self {
            call_id,
            ok: true,
            data: serde_json::to_vec(data)?,
            message: String::new(),
        })
    }

    /// Response for a command that failed on the remote side
    pub fn failure(
        call_id: u64,
        message: impl Into<String>,
        data: Option<&Value>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            call_id,
            ok: false,
            data: data.map(serde_json::to_vec).transpose()?.unwrap_or_default(),
            message: message.into(),
        })
    }

    /// Decode the response body. An empty body decodes as `null` on success
    /// and as no data on failure.
    pub fn reply(&self) -> Result<Reply, serde_json::Error> {
        let data = if self.data.is_empty() {
            None
        } else {
            Some(serde_json::from_slice::<Value>(&self.data)?)
        };

        if self.ok {
            Ok(Reply::Success(data.unwrap_or(Value::Null)))
        } else {
            Ok(Reply::Failure {
                message: self.message.clone(),
                data,
            })
        }
    }
}
