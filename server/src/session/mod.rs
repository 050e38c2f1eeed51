//! Client sessions
//!
//! This module handles:
//! - Reading request frames from a connected client
//! - Running each request concurrently against the module registry
//! - Writing responses back in completion order

mod connection;

pub use connection::{serve, ModuleSession};
