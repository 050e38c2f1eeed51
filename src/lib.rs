//! Client-side command dispatch over a connected transport
//!
//! Facades call [`DispatchClient::send_command`] with a command name, a target
//! module, optional parameters and an optional timeout; the client returns the
//! remote payload or a classified [`DispatchError`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod modules;
pub mod transport;

pub use config::{AbsentParams, ClientConfig};
pub use dispatch::{CommandRequest, DispatchClient};
pub use error::{CommandOutcome, DispatchError, ErrorKind};
