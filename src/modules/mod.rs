//! Typed facades over remote modules

pub mod audio;

pub use audio::AudioModule;
