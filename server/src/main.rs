mod command;
mod config;
mod modules;
mod session;

use command::ModuleRegistry;
use config::ServerConfig;
use modules::AudioModule;
use session::ModuleSession;
use std::sync::Arc;
use tokio::net::TcpListener;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ServerConfig::from_env();

    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(AudioModule::with_defaults(config.audio)));
    let registry = Arc::new(registry);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("Module server listening on {}", config.listen_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Connection from: {}", addr);

        let registry = registry.clone();
        tokio::spawn(async move {
            session::serve(ModuleSession::new(stream, addr), registry).await;
        });
    }
}
