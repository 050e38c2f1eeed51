//! Module server configuration

use crate::modules::AudioTiming;

/// Environment variable overriding the listen address
pub const ENV_LISTEN_ADDR: &str = "MODULE_SERVER_ADDR";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub audio: AudioTiming,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            audio: AudioTiming::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
            config.listen_addr = addr;
        }
        config
    }
}
