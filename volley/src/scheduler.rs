//! Ramps the number of concurrent VUs along a staged profile.
//!
//! A single control loop owns every worker. Once per reconcile interval it works out how many VUs
//! the profile asks for at that instant and spawns or cancels workers to match. Cancelled workers
//! always finish the iteration they are in, so no request is ever cut short by a ramp down.
mod profile;
mod state;
mod timer;

pub use profile::{Position, RampProfile, Stage};
pub use state::{RunPhase, RunStatus};

use crate::sink::{MetricsSink, SummarySink};
use crate::workflow::Workflow;
use arc_swap::ArcSwap;
use state::RunState;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use timer::Timer;
use tokio::runtime::Handle;
use tokio::sync::watch;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};
use volley_core::{ConfigError, RunConfig, RunStatistics};

/// Drives a single run. A scheduler can only be started once.
pub struct RampScheduler<W, S> {
    workflow: Arc<W>,
    sink: Arc<S>,
    started: AtomicBool,
    status: Arc<ArcSwap<RunStatus>>,
    stop: watch::Sender<bool>,
    done: Arc<watch::Sender<bool>>,
}

impl<W, S> RampScheduler<W, S>
where
    W: Workflow + 'static,
    S: MetricsSink + 'static,
{
    pub fn new(workflow: Arc<W>, sink: Arc<S>) -> Self {
        Self {
            workflow,
            sink,
            started: AtomicBool::new(false),
            status: Arc::new(ArcSwap::from_pointee(RunStatus::default())),
            stop: watch::Sender::new(false),
            done: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Validate `config` and launch the control loop in the background. Nothing is spawned if
    /// the configuration is rejected.
    ///
    /// The control loop is spawned onto the current Tokio runtime, so this must be called from
    /// within one. Outside of a runtime it fails with [`ConfigError::NoRuntime`].
    pub fn start(&self, config: &RunConfig) -> Result<(), ConfigError> {
        if self.phase() != RunPhase::Idle {
            return Err(ConfigError::AlreadyStarted);
        }
        if config.reconcile_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        let max_concurrency = config.effective_max_concurrency();
        let profile = RampProfile::new(&config.stages, max_concurrency)?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        // NOTE: Subscribed before the run is claimed, so a concurrent `stop` always reaches both.
        let state_stop = self.stop.subscribe();
        let loop_stop = self.stop.subscribe();

        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConfigError::AlreadyStarted);
        }

        info!(
            "Starting run: {} stages over {}, peaking at {} of at most {max_concurrency} VUs",
            profile.stages().len(),
            humantime::format_duration(profile.total_duration()),
            profile.max_target()
        );
        let state = RunState::new(
            self.workflow.clone(),
            self.sink.clone(),
            config.pacing,
            max_concurrency,
            state_stop,
        );
        let control = ControlLoop {
            profile,
            state,
            timer: Timer::new(config.reconcile_interval),
            grace_period: config.grace_period,
            status: self.status.clone(),
            stop: loop_stop,
            done: self.done.clone(),
        };

        self.status.store(Arc::new(RunStatus {
            phase: RunPhase::Ramping,
            ..Default::default()
        }));
        runtime.spawn(control.run());

        Ok(())
    }

    /// Stop spawning, cancel every VU and wait for the run to wind down. Workers still busy after
    /// the grace period are abandoned.
    pub async fn stop(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("Stopped before starting");
            self.status.store(Arc::new(RunStatus {
                phase: RunPhase::Stopped,
                ..Default::default()
            }));
            self.done.send_replace(true);
            return;
        }

        self.stop.send_replace(true);
        self.wait().await;
    }

    /// Wait for the run to reach [`RunPhase::Stopped`]. Returns immediately if it was never
    /// started.
    pub async fn wait(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        let mut done = self.done.subscribe();
        // NOTE: Only errors if the sender is dropped, which cannot happen while `self` lives.
        let _ = done.wait_for(|done| *done).await;
    }

    pub fn status(&self) -> RunStatus {
        **self.status.load()
    }

    pub fn phase(&self) -> RunPhase {
        self.status.load().phase
    }
}

impl<W, S> Drop for RampScheduler<W, S> {
    fn drop(&mut self) {
        // NOTE: The control loop keeps running in the background and winds the run down.
        self.stop.send_replace(true);
    }
}

struct ControlLoop<W, S> {
    profile: RampProfile,
    state: RunState<W, S>,
    timer: Timer,
    grace_period: Duration,
    status: Arc<ArcSwap<RunStatus>>,
    stop: watch::Receiver<bool>,
    done: Arc<watch::Sender<bool>>,
}

enum Exit {
    Stopped,
    Completed,
    GraceExceeded,
}

impl<W, S> ControlLoop<W, S>
where
    W: Workflow + 'static,
    S: MetricsSink + 'static,
{
    #[instrument(name = "ramp", skip_all)]
    async fn run(mut self) {
        let total = self.profile.total_duration();
        let mut phase = RunPhase::Ramping;
        let mut peaked = false;

        let exit = loop {
            // NOTE: `wait_for` also sees a stop which landed before the loop first ran.
            let elapsed = tokio::select! {
                biased;
                _ = self.stop.wait_for(|stop| *stop) => break Exit::Stopped,
                elapsed = self.timer.tick() => elapsed,
            };

            self.state.reap().await;

            let (stage, desired) = match self.profile.position(elapsed) {
                Position::Stage { index, desired } => {
                    peaked |= desired > 0;
                    if peaked && desired == 0 && self.profile.idle_from(index) {
                        phase = transition(phase, RunPhase::Draining);
                    }
                    (Some(index), desired)
                }
                Position::Finished => {
                    phase = transition(phase, RunPhase::Draining);
                    (None, 0)
                }
            };

            self.state.reconcile(desired);
            self.state.publish(&self.status, phase, stage, desired, elapsed);

            if elapsed >= total {
                if self.state.is_empty() {
                    break Exit::Completed;
                }
                if elapsed >= total.saturating_add(self.grace_period) {
                    break Exit::GraceExceeded;
                }
            }
        };

        match exit {
            Exit::Stopped => {
                info!("Stop requested after {}", fmt_elapsed(self.timer.elapsed()));
                self.state.shutdown(self.grace_period).await;
            }
            Exit::GraceExceeded => {
                self.state.shutdown(Duration::ZERO).await;
            }
            Exit::Completed => {}
        }

        let elapsed = self.timer.elapsed();
        transition(phase, RunPhase::Stopped);
        self.state
            .publish(&self.status, RunPhase::Stopped, None, 0, elapsed);
        self.done.send_replace(true);
    }
}

fn transition(from: RunPhase, to: RunPhase) -> RunPhase {
    if from != to {
        info!("Run is now {to}");
    }
    to
}

fn fmt_elapsed(elapsed: Duration) -> humantime::FormattedDuration {
    // NOTE: Sub-millisecond noise makes the output unreadable.
    humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
}

/// Run `workflow` along the profile in `config` to completion and summarize the results.
///
/// Must be awaited on a Tokio runtime, see [`RampScheduler::start`].
pub async fn run_load_test<W>(
    config: &RunConfig,
    workflow: Arc<W>,
) -> Result<RunStatistics, ConfigError>
where
    W: Workflow + 'static,
{
    let sink = Arc::new(SummarySink::new());
    let scheduler = RampScheduler::new(workflow, sink.clone());
    scheduler.start(config)?;
    scheduler.wait().await;

    let status = scheduler.status();
    info!(
        "Run complete after {}, {} iterations",
        fmt_elapsed(status.elapsed),
        status.iterations
    );
    Ok(sink.summary(status.elapsed))
}
