//! Protobuf frame definitions

use prost::{Message, Oneof};

/// Top-level frame exchanged between client and module server
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(oneof = "envelope::Payload", tags = "1, 2")]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    use super::*;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Request(super::Request),
        #[prost(message, tag = "2")]
        Response(super::Response),
    }
}

/// A command invocation addressed to a module
#[derive(Clone, PartialEq, Message)]
pub struct Request {
    #[prost(uint64, tag = "1")]
    pub call_id: u64,

    #[prost(string, tag = "2")]
    pub command: String,

    #[prost(string, tag = "3")]
    pub module: String,

    /// JSON-encoded parameters; absent when none were supplied
    #[prost(bytes = "vec", optional, tag = "4")]
    pub params: Option<Vec<u8>>,
}

/// Result of a command, correlated by `call_id`
#[derive(Clone, PartialEq, Message)]
pub struct Response {
    #[prost(uint64, tag = "1")]
    pub call_id: u64,

    #[prost(bool, tag = "2")]
    pub ok: bool,

    /// JSON-encoded payload
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,

    #[prost(string, tag = "4")]
    pub message: String,
}
