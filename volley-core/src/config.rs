use crate::{
    DEFAULT_BASE_URL, DEFAULT_GRACE_PERIOD, DEFAULT_QUERY_PATH, DEFAULT_RECONCILE_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SNIPPET_LEN, DEFAULT_SUBMISSION_PATH,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Problems with a load test's configuration. These are the only errors which halt a run, and
/// they are always raised before any virtual user is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ramp profile has no stages")]
    EmptyProfile,

    #[error("stage {stage} has a negative duration ({secs}s)")]
    NegativeDuration { stage: usize, secs: f64 },

    #[error("stage {stage} has a non-finite duration")]
    InvalidDuration { stage: usize },

    #[error("stage {stage} has a negative target ({target})")]
    NegativeTarget { stage: usize, target: i64 },

    #[error("stage {stage} targets {target} VUs, above the maximum concurrency of {max}")]
    TargetExceedsMax {
        stage: usize,
        target: usize,
        max: usize,
    },

    #[error("reconcile interval must be greater than zero")]
    ZeroInterval,

    #[error("load test has already been started")]
    AlreadyStarted,

    #[error("load test must be started from within a Tokio runtime")]
    NoRuntime,

    #[error("invalid stage `{0}`, expected `<duration>:<target>` such as `5m:100`")]
    InvalidStage(String),

    #[error("unable to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A single ramp stage as written in configuration.
///
/// The fields are signed so that bad input can be represented and rejected when the run starts,
/// rather than silently clamped while parsing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub duration_secs: f64,
    pub target: i64,
}

impl StageConfig {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self {
            duration_secs: duration.as_secs_f64(),
            target: target as i64,
        }
    }
}

impl FromStr for StageConfig {
    type Err = ConfigError;

    /// Parses `<duration>:<target>`, e.g. `5m:100` or `30s:0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidStage(s.to_string());

        let (duration, target) = s.trim().split_once(':').ok_or_else(invalid)?;
        let duration = humantime::parse_duration(duration.trim()).map_err(|_| invalid())?;
        let target = target.trim().parse::<i64>().map_err(|_| invalid())?;

        Ok(Self {
            duration_secs: duration.as_secs_f64(),
            target,
        })
    }
}

/// Scheduler configuration for a single run.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub stages: Vec<StageConfig>,

    /// Ceiling on concurrently active VUs. Defaults to the largest stage target.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Pause between two iterations of the same VU.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "pacing_ms", default)]
    pub pacing: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(
        rename = "reconcile_interval_ms",
        default = "default_reconcile_interval"
    )]
    pub reconcile_interval: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "grace_period_secs", default = "default_grace_period")]
    pub grace_period: Duration,
}

impl RunConfig {
    pub fn new(stages: Vec<StageConfig>) -> Self {
        Self {
            stages,
            max_concurrency: None,
            pacing: Duration::ZERO,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// The configured ceiling, or the largest (non-negative) stage target if none was given.
    pub fn effective_max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or_else(|| {
            self.stages
                .iter()
                .map(|s| s.target.max(0) as usize)
                .max()
                .unwrap_or(0)
        })
    }
}

fn default_reconcile_interval() -> Duration {
    DEFAULT_RECONCILE_INTERVAL
}

fn default_grace_period() -> Duration {
    DEFAULT_GRACE_PERIOD
}

/// Where the workflow sends its requests.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_submission_path")]
    pub submission_path: String,

    #[serde(default = "default_query_path")]
    pub query_path: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "request_timeout_secs", default = "default_request_timeout")]
    pub request_timeout: Duration,

    #[serde(default = "default_snippet_len")]
    pub snippet_len: usize,

    /// Optional ceiling on requests per second, shared by every VU sending to this target.
    #[serde(default)]
    pub max_rps: Option<NonZeroU32>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl TargetConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            submission_path: DEFAULT_SUBMISSION_PATH.to_string(),
            query_path: DEFAULT_QUERY_PATH.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            snippet_len: DEFAULT_SNIPPET_LEN,
            max_rps: None,
        }
    }

    pub fn with_max_rps(mut self, max_rps: NonZeroU32) -> Self {
        self.max_rps = Some(max_rps);
        self
    }

    pub fn submission_url(&self) -> String {
        join_url(&self.base_url, &self.submission_path)
    }

    pub fn query_url(&self) -> String {
        join_url(&self.base_url, &self.query_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_submission_path() -> String {
    DEFAULT_SUBMISSION_PATH.to_string()
}

fn default_query_path() -> String {
    DEFAULT_QUERY_PATH.to_string()
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_snippet_len() -> usize {
    DEFAULT_SNIPPET_LEN
}

/// On-disk configuration: the run settings plus the target they are aimed at.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub run: RunConfig,

    #[serde(default)]
    pub target: TargetConfig,
}

impl Config {
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }
}
