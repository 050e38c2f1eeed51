//! Command execution for hosted modules
//!
//! This module handles:
//! - Decoding request parameters
//! - Routing each request to the module that owns it
//! - Turning results and failures into response frames

mod registry;

pub use registry::{CommandError, ModuleRegistry, RemoteModule};
