use command_dispatch::modules::AudioModule;
use command_dispatch::transport::{TcpTransport, TcpTransportConfig};
use command_dispatch::{ClientConfig, CommandOutcome, DispatchClient};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let client_config = ClientConfig::from_env()?;
    let transport_config = TcpTransportConfig::from_env();

    info!("Dispatch demo starting");
    info!("  Module server: {}", transport_config.address);
    info!("  Default timeout: {:?}", client_config.default_timeout);

    let (transport, events) = TcpTransport::connect(transport_config.clone());
    if let Err(e) = transport
        .wait_connected(transport_config.connect_timeout)
        .await
    {
        warn!("Module server unavailable: {}", e);
    }

    let client = DispatchClient::new(transport, events, client_config)?;
    let audio = AudioModule::new(client.clone());

    report("set_volumes", audio.set_volumes(50, 70).await);
    report("select_device", audio.select_device("hdmi0").await);
    report("test_playing", audio.test_playing().await);
    report("test_recording", audio.test_recording().await);

    // Calls are independent; run two concurrently to show out-of-order settlement.
    let (volumes, playing) = futures::join!(audio.set_volumes(20, 30), audio.test_playing());
    report("set_volumes (concurrent)", volumes);
    report("test_playing (concurrent)", playing);

    client.shutdown();
    Ok(())
}

fn report(label: &str, outcome: CommandOutcome) {
    match outcome {
        Ok(payload) => info!("{} -> {}", label, payload),
        Err(e) => error!("{} failed ({}): {}", label, e.kind(), e.message()),
    }
}
