use clap::Parser;
use mock_service::{serve, tps_measure_task, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(version = "0.1")]
struct MockCli {
    #[arg(short, long, default_value = "0.0.0.0:8000")]
    addr: SocketAddr,

    /// Mean delay before answering, e.g. `20ms`.
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "0ms")]
    delay: Duration,

    /// Fraction of requests answered with a 500.
    #[arg(short, long, default_value_t = 0.)]
    failure_ratio: f64,

    #[arg(short, long)]
    max_tps: Option<NonZeroU32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("mock_service=debug,tower_http=info")
        .init();

    let cli = MockCli::parse();
    let state = Arc::new(ServiceState::new(ServiceConfig {
        delay: cli.delay,
        failure_ratio: cli.failure_ratio,
        max_tps: cli.max_tps,
    }));

    tokio::spawn(tps_measure_task());

    let listener = TcpListener::bind(&cli.addr).await?;
    info!("Listening on {}", cli.addr);
    serve(listener, state).await
}
