use anyhow::{bail, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use volley::core::{Config, RunConfig, StageConfig, TargetConfig};

/// Ramp virtual users against a search service.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct VolleyCli {
    /// JSON run configuration. Flags below override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// A ramp stage as `<duration>:<target>`, e.g. `5m:100`. Repeat for each stage, in order.
    #[arg(short, long = "stage")]
    pub stages: Vec<StageConfig>,

    #[arg(long)]
    pub max_concurrency: Option<usize>,

    #[arg(short, long)]
    pub base_url: Option<String>,

    /// Pause between two iterations of the same VU, e.g. `500ms`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub pacing: Option<Duration>,

    /// Cap on requests per second across every VU.
    #[arg(long)]
    pub max_rps: Option<NonZeroU32>,

    /// Text file the request payloads are sampled from.
    #[arg(long)]
    pub corpus: PathBuf,

    /// Serve Prometheus metrics on this address for the duration of the run.
    #[arg(long)]
    pub prometheus: Option<SocketAddr>,

    /// Log every failed request and check.
    #[arg(short, long)]
    pub verbose: bool,
}

impl VolleyCli {
    /// The configuration file (if any) with every flag applied on top.
    pub fn resolve(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Unable to read {}", path.display()))?;
                Config::from_json(&raw)
                    .with_context(|| format!("Invalid configuration in {}", path.display()))?
            }
            None => Config {
                run: RunConfig::new(vec![]),
                target: TargetConfig::default(),
            },
        };

        if !self.stages.is_empty() {
            config.run.stages = self.stages.clone();
        }
        if config.run.stages.is_empty() {
            bail!("No stages given, pass at least one --stage or a --config file with stages");
        }
        if let Some(max) = self.max_concurrency {
            config.run.max_concurrency = Some(max);
        }
        if let Some(base_url) = &self.base_url {
            config.target.base_url = base_url.clone();
        }
        if let Some(pacing) = self.pacing {
            config.run.pacing = pacing;
        }
        if let Some(max_rps) = self.max_rps {
            config.target.max_rps = Some(max_rps);
        }

        Ok(config)
    }

    pub fn log_filter(&self) -> String {
        match std::env::var("RUST_LOG") {
            Ok(filter) if !filter.is_empty() => filter,
            _ if self.verbose => "volley=debug".to_string(),
            _ => "volley=info".to_string(),
        }
    }
}
