//! WIS2 node ingester.
//!
//! Watches the intake directory and publishes WIS2 notifications for every
//! observation file dropped into it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use publisher::{MqttBroker, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ingester::server::start_server;
use ingester::{IngesterConfig, IngesterService};

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "WIS2 node: converts observations and publishes notifications")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "INGESTER_CONFIG", default_value = "./config/ingester.yaml")]
    config: PathBuf,

    /// Process the files currently in the intake directory, wait for
    /// delivery and exit
    #[arg(long)]
    once: bool,

    /// How long `--once` waits for the outbox to drain, in seconds
    #[arg(long, default_value_t = 60)]
    drain_timeout: u64,

    /// HTTP port (overrides the config file)
    #[arg(short, long, env = "INGESTER_PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    };

    let config = IngesterConfig::load(&args.config)?;
    info!(
        config = %args.config.display(),
        watch_dir = %config.intake.watch_dir.display(),
        broker = %config.publisher.broker.url,
        "Starting WIS2 ingester"
    );

    let cancel = CancellationToken::new();
    let broker = Arc::new(
        MqttBroker::connect(&config.publisher.broker, cancel.child_token())
            .context("Invalid broker configuration")?,
    );
    let service = IngesterService::build(&config, broker.clone(), Arc::new(SystemClock)).await?;

    let server = {
        let state = service.server_state();
        let port = args.port.unwrap_or(config.server.port);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = start_server(state, metrics, port, cancel).await {
                error!(error = %e, "HTTP server failed");
            }
        })
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                cancel.cancel();
            }
        });
    }

    let result = service
        .run(cancel.clone(), args.once, Duration::from_secs(args.drain_timeout))
        .await;

    cancel.cancel();
    broker.disconnect().await;
    if let Err(e) = server.await {
        warn!(error = %e, "HTTP server task ended abnormally");
    }
    service.database.close().await;

    match &result {
        Ok(()) => info!("Ingester stopped"),
        Err(e) => error!(error = %e, "Ingester stopped on error"),
    }
    result
}
