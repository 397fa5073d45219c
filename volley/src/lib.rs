#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod error;
pub mod payload;
pub mod scheduler;
pub mod sink;
pub mod transport;
pub mod workflow;

pub(crate) mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use scheduler::{run_load_test, RampScheduler, RunPhase, RunStatus};
pub use volley_core as core;

pub mod prelude {
    pub use crate::error::{ConfigError, PayloadError, TransportError};
    pub use crate::payload::{CorpusSampler, PayloadProducer};
    pub use crate::scheduler::{run_load_test, RampProfile, RampScheduler, RunPhase, RunStatus};
    pub use crate::sink::{MetricsSink, SummarySink};
    #[cfg(feature = "http")]
    pub use crate::transport::ReqwestTransport;
    pub use crate::transport::Transport;
    pub use crate::workflow::{SearchWorkflow, Workflow};

    pub use volley_core::{Config, RunConfig, RunStatistics, StageConfig, TargetConfig};
}
