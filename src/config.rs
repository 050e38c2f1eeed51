//! Dispatch client configuration

use dispatch_shared::defaults;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the default command timeout (seconds)
pub const ENV_DEFAULT_TIMEOUT: &str = "DISPATCH_DEFAULT_TIMEOUT_SECS";

/// Environment variable selecting [`AbsentParams::Omit`] when set to `1`/`true`
pub const ENV_OMIT_ABSENT_PARAMS: &str = "DISPATCH_OMIT_ABSENT_PARAMS";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Default timeout must be positive")]
    ZeroTimeout,

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// How a call without parameters is put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbsentParams {
    /// Send an empty JSON object
    #[default]
    EmptyObject,
    /// Leave the parameter field off the frame
    Omit,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Applied to every call that does not carry its own timeout
    pub default_timeout: Duration,
    pub absent_params: AbsentParams,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: defaults::COMMAND_TIMEOUT,
            absent_params: AbsentParams::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `DISPATCH_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_DEFAULT_TIMEOUT) {
            let secs: f64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: ENV_DEFAULT_TIMEOUT,
                value: value.clone(),
            })?;
            config.default_timeout =
                Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
                    name: ENV_DEFAULT_TIMEOUT,
                    value,
                })?;
        }

        if let Some(value) = lookup(ENV_OMIT_ABSENT_PARAMS) {
            config.absent_params = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => AbsentParams::Omit,
                "0" | "false" | "no" | "" => AbsentParams::EmptyObject,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: ENV_OMIT_ABSENT_PARAMS,
                        value,
                    })
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}
