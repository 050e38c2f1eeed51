//! Command dispatch for module facades
//!
//! This module handles:
//! - Validating command invocations before they touch the transport
//! - Correlating responses to calls by call id
//! - Per-call timeouts with a client-wide default
//! - Classifying every failure into an `ErrorKind`

mod client;
mod pending;
mod request;

pub use client::DispatchClient;
pub use request::CommandRequest;
