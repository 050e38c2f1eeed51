//! Modules hosted by the server

mod audio;

pub use audio::{AudioModule, AudioTiming};
