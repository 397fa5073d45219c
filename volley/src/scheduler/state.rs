use crate::sink::MetricsSink;
use crate::worker::{Worker, WorkerHandle, WorkerReport};
use crate::workflow::Workflow;
use arc_swap::ArcSwap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    #[default]
    Idle,
    Ramping,
    Draining,
    Stopped,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Ramping => "ramping",
            RunPhase::Draining => "draining",
            RunPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Snapshot of a run, as of the last reconcile.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    pub phase: RunPhase,
    /// Index of the current stage, `None` before the run and once the profile has elapsed.
    pub stage: Option<usize>,
    pub desired: usize,
    pub active: usize,
    /// Cancelled workers still finishing their last iteration.
    pub retiring: usize,
    pub spawned: u64,
    pub iterations: u64,
    pub elapsed: Duration,
}

/// Everything the control loop owns for a single run. Never shared: worker handles only ever
/// live here.
pub(crate) struct RunState<W, S> {
    workflow: Arc<W>,
    sink: Arc<S>,
    iterations: Arc<AtomicU64>,
    pacing: Duration,
    max_concurrency: usize,
    stop: watch::Receiver<bool>,
    active: Vec<WorkerHandle>,
    retiring: Vec<WorkerHandle>,
    next_id: usize,
}

impl<W, S> RunState<W, S>
where
    W: Workflow + 'static,
    S: MetricsSink + 'static,
{
    pub fn new(
        workflow: Arc<W>,
        sink: Arc<S>,
        pacing: Duration,
        max_concurrency: usize,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            workflow,
            sink,
            iterations: Arc::new(AtomicU64::new(0)),
            pacing,
            max_concurrency,
            stop,
            active: vec![],
            retiring: vec![],
            next_id: 0,
        }
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn retiring(&self) -> usize {
        self.retiring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.retiring.is_empty()
    }

    pub fn spawned(&self) -> u64 {
        self.next_id as u64
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Bring the number of active workers to `desired` (capped at the configured maximum).
    /// Surplus workers are cancelled newest first and retire once their iteration completes.
    pub fn reconcile(&mut self, desired: usize) {
        let desired = desired.min(self.max_concurrency);
        let active = self.active.len();

        if desired > active {
            // NOTE: Re-checked right before spawning, a stop may have landed mid-tick.
            if *self.stop.borrow() {
                return;
            }
            debug!("Spawning {} VUs ({active} -> {desired})", desired - active);
            for _ in active..desired {
                self.spawn();
            }
        } else if desired < active {
            debug!("Retiring {} VUs ({active} -> {desired})", active - desired);
            for _ in desired..active {
                if let Some(handle) = self.active.pop() {
                    handle.cancel();
                    self.retiring.push(handle);
                }
            }
        }
    }

    fn spawn(&mut self) {
        let worker = Worker::new(
            self.next_id,
            self.workflow.clone(),
            self.sink.clone(),
            self.iterations.clone(),
            self.pacing,
        );
        self.next_id += 1;
        self.active.push(worker.spawn());
    }

    /// Drop the handles of every worker which has exited. Active workers only exit early if they
    /// panicked, in which case they are replaced on the next reconcile.
    pub async fn reap(&mut self) {
        for handle in take_finished(&mut self.retiring) {
            join(handle).await;
        }
        for handle in take_finished(&mut self.active) {
            join(handle).await;
        }
    }

    /// Cancel everything, give workers until `grace` to finish their iteration and abort the
    /// rest. Returns the number of abandoned workers, which is also reported to the sink as the
    /// number of interrupted iterations.
    pub async fn shutdown(&mut self, grace: Duration) -> usize {
        for handle in self.active.drain(..) {
            handle.cancel();
            self.retiring.push(handle);
        }
        if self.retiring.is_empty() {
            return 0;
        }
        info!(
            "Waiting up to {} for {} VUs to finish",
            humantime::format_duration(grace),
            self.retiring.len()
        );

        let deadline = Instant::now() + grace;
        let mut abandoned = 0;
        for mut handle in self.retiring.drain(..) {
            let res = tokio::time::timeout_at(deadline, handle.task()).await;
            match res {
                Ok(res) => log_exit(handle.id(), res),
                Err(_) => {
                    handle.abort();
                    // NOTE: Resolves once the aborted task has actually been torn down.
                    let _ = handle.task().await;
                    abandoned += 1;
                }
            }
        }

        if abandoned > 0 {
            warn!("Abandoned {abandoned} VUs still running after the grace period");
            self.sink.record_interrupted(abandoned as u64);
        }
        abandoned
    }

    pub fn publish(
        &self,
        status: &ArcSwap<RunStatus>,
        phase: RunPhase,
        stage: Option<usize>,
        desired: usize,
        elapsed: Duration,
    ) {
        let snapshot = RunStatus {
            phase,
            stage,
            desired,
            active: self.active(),
            retiring: self.retiring(),
            spawned: self.spawned(),
            iterations: self.iterations(),
            elapsed,
        };
        trace!("{snapshot:?}");
        self.sink.record_vus(snapshot.active + snapshot.retiring);
        status.store(Arc::new(snapshot));
    }
}

fn take_finished(handles: &mut Vec<WorkerHandle>) -> Vec<WorkerHandle> {
    let (finished, running): (Vec<_>, Vec<_>) =
        handles.drain(..).partition(WorkerHandle::is_finished);
    *handles = running;
    finished
}

async fn join(mut handle: WorkerHandle) {
    let res = handle.task().await;
    log_exit(handle.id(), res);
}

fn log_exit(id: usize, res: Result<WorkerReport, JoinError>) {
    match res {
        Ok(report) => trace!("VU {id} exited after {} iterations", report.iterations),
        Err(err) if err.is_panic() => error!("VU {id} panicked: {err}"),
        Err(err) => debug!("VU {id} did not exit cleanly: {err}"),
    }
}
