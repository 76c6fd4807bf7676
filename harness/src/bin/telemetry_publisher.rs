use clap::Parser;
use harness::shutdown::stop_on_ctrl_c;
use harness::telemetry::{PublisherConfig, TelemetryPublisher};
use std::time::Duration;
use tracing::{error, info};
use wamp::{Session, WampClient, WampConfig};

#[derive(Parser)]
#[command(name = "telemetry-publisher")]
#[command(about = "Publish synthetic sine-wave telemetry to a WAMP router")]
struct Cli {
    /// Router WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
    /// Realm to join
    #[arg(long, default_value = "realm1")]
    realm: String,
    /// Milliseconds between publish iterations
    #[arg(long, default_value = "200")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let wamp_config = WampConfig::default()
        .with_url(cli.url)
        .with_realm(cli.realm);
    let publisher_config =
        PublisherConfig::default().with_publish_interval(Duration::from_millis(cli.interval_ms));
    publisher_config.validate()?;

    let client = WampClient::connect(&wamp_config).await?;
    info!(
        "Joined realm {} as session {}",
        client.realm(),
        client.session_id()
    );

    let publisher = TelemetryPublisher::new(&client, publisher_config);
    let mut stop = stop_on_ctrl_c();

    let outcome = match publisher.on_join().await {
        Ok(_) => publisher.run(&mut stop).await.map(|_| ()),
        Err(e) => Err(e),
    };

    if let Err(e) = &outcome {
        error!("Session failed: {}", e);
    }

    if !client.is_closed() {
        if let Err(e) = client.leave().await {
            error!("Could not leave session cleanly: {}", e);
        }
    }

    outcome?;
    Ok(())
}
