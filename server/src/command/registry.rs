//! Routes incoming requests to the module that owns them

use async_trait::async_trait;
use dispatch_shared::{Request, Response};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure reported back to the client in a response frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Parameter \"{0}\" is missing")]
    MissingParameter(String),

    #[error("{0}")]
    InvalidParameter(String),

    #[error("Unknown module \"{0}\"")]
    UnknownModule(String),

    #[error("Unknown command \"{command}\" for module \"{module}\"")]
    UnknownCommand { module: String, command: String },

    #[error("{0}")]
    Failed(String),
}

/// A module hosted by this server
#[async_trait]
pub trait RemoteModule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, command: &str, params: Map<String, Value>) -> Result<Value, CommandError>;
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<&'static str, Arc<dyn RemoteModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Arc<dyn RemoteModule>) {
        info!("Registered module {}", module.name());
        self.modules.insert(module.name(), module);
    }

    /// Run `command` on `module`
    pub async fn execute(
        &self,
        module: &str,
        command: &str,
        params: Option<Value>,
    ) -> Result<Value, CommandError> {
        let target = self
            .modules
            .get(module)
            .ok_or_else(|| CommandError::UnknownModule(module.to_string()))?;

        let params = match params {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(CommandError::InvalidParameter(
                    "Parameters must be an object".into(),
                ))
            }
        };

        target.handle(command, params).await
    }

    /// Execute a request frame and build its response
    pub async fn handle_request(&self, request: &Request) -> Response {
        let started = Instant::now();

        let result = match request.decode_params() {
            Ok(params) => self.execute(&request.module, &request.command, params).await,
            Err(e) => Err(CommandError::InvalidParameter(format!(
                "Parameters are not valid JSON: {}",
                e
            ))),
        };

        match &result {
            Ok(_) => debug!(
                "Call {} ({}.{}) completed in {:?}",
                request.call_id,
                request.module,
                request.command,
                started.elapsed()
            ),
            Err(e) => warn!(
                "Call {} ({}.{}) failed: {}",
                request.call_id, request.module, request.command, e
            ),
        }

        let encoded = match result {
            Ok(data) => Response::success(request.call_id, &data),
            Err(e) => Response::failure(request.call_id, e.to_string(), None),
        };

        encoded.unwrap_or_else(|e| Response {
            call_id: request.call_id,
            ok: false,
            data: Vec::new(),
            message: format!("Failed to encode result: {}", e),
        })
    }
}
