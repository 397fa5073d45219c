use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;
use volley::prelude::*;

mod args;

use args::VolleyCli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = VolleyCli::parse();

    FmtSubscriber::builder()
        .with_env_filter(cli.log_filter())
        .init();

    if let Some(addr) = cli.prometheus {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Unable to start the Prometheus exporter")?;
        info!("Serving metrics on {addr}");
    }

    let config = cli.resolve()?;
    let sampler = CorpusSampler::from_file(&cli.corpus, config.target.snippet_len)
        .with_context(|| format!("Unable to load corpus {}", cli.corpus.display()))?;
    info!(
        "Loaded {} bytes of corpus from {}",
        sampler.corpus_len(),
        cli.corpus.display()
    );

    if let Some(max_rps) = config.target.max_rps {
        info!("Capping requests at {max_rps}/s");
    }
    let transport = ReqwestTransport::new(config.target.request_timeout)?;
    let stats = run(&config.run, &config.target, sampler, transport).await?;

    println!("{stats}");
    Ok(())
}

async fn run<T>(
    config: &RunConfig,
    target: &TargetConfig,
    sampler: CorpusSampler,
    transport: T,
) -> anyhow::Result<RunStatistics>
where
    T: Transport + 'static,
{
    let workflow = Arc::new(SearchWorkflow::new(sampler, transport, target));
    let sink = Arc::new(SummarySink::new());
    let scheduler = RampScheduler::new(workflow, sink.clone());
    scheduler.start(config)?;

    tokio::select! {
        _ = scheduler.wait() => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                warn!("Unable to listen for Ctrl-C: {err}");
                scheduler.wait().await;
            } else {
                info!("Interrupted, stopping");
                scheduler.stop().await;
            }
        }
    }

    Ok(sink.summary(scheduler.status().elapsed))
}
