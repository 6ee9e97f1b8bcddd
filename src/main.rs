//! devrelay binary entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use devrelay::cli::{Cli, Command, run_devices_command, run_pairing_command};
use devrelay::config::{LogFormat, RelayConfig};
use devrelay::history::{HistorySink, InfluxHistory, NullHistory};
use devrelay::ingest::{MqttIngest, MqttSettings};
use devrelay::relay::DeviceRelay;
use devrelay::server::{AppState, HttpServer, HttpServerConfig, router};
use devrelay::sweeper::LivenessSweeper;
use devrelay::tasks::BackgroundTasks;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Pairing(cmd)) => {
            init_tracing("warn", cli.log_json);
            run_pairing_command(cmd, &cli.url).await
        }
        Some(Command::Devices { json }) => {
            init_tracing("warn", cli.log_json);
            run_devices_command(&cli.url, json).await
        }
        Some(Command::Serve { port }) => serve(port, cli.log_json).await,
        None => serve(None, cli.log_json).await,
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(port: Option<u16>, log_json: bool) -> anyhow::Result<()> {
    let mut config = RelayConfig::from_env()?;
    if let Some(port) = port {
        config.port = port;
    }
    init_tracing(
        &config.logging.level,
        log_json || config.logging.format == LogFormat::Json,
    );

    tracing::info!(
        port = config.port,
        mqtt = %config.mqtt.broker,
        influx = config.influx.as_ref().map(|i| i.url.as_str()).unwrap_or("<disabled>"),
        "Starting devrelay"
    );

    let mut tasks = BackgroundTasks::new();

    let history: Arc<dyn HistorySink> = match config.influx.clone() {
        Some(influx) => {
            let (sink, task) = InfluxHistory::spawn(influx, tasks.history_token())?;
            tasks.set_history(task);
            Arc::new(sink)
        }
        None => {
            tracing::info!("INFLUX_URL not set, history disabled");
            Arc::new(NullHistory)
        }
    };

    let relay = Arc::new(
        DeviceRelay::new(history).with_offline_threshold(config.offline_threshold_chrono()),
    );

    let mqtt = MqttSettings::from_url(
        &config.mqtt.broker,
        config.mqtt.client_id.clone(),
        config.mqtt.heartbeat_topic.clone(),
    )?;
    tasks.push_producer(MqttIngest::new(mqtt, Arc::clone(&relay)).spawn(tasks.producer_token()));
    tasks.push_producer(
        LivenessSweeper::new(Arc::clone(&relay))
            .with_interval(config.sweep_interval)
            .spawn(tasks.producer_token()),
    );

    let app = router(AppState {
        relay: Arc::clone(&relay),
        host_ip: config.host_ip.clone(),
    });
    let mut server = HttpServer::new(
        HttpServerConfig {
            addr: SocketAddr::new(config.bind_host, config.port),
        },
        app,
    )
    .with_shutdown(tasks.producer_token());
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    tasks.cancel_producers();
    server.join().await;
    tasks.shutdown().await;

    tracing::info!("devrelay stopped");
    Ok(())
}
