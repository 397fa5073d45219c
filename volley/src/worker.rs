use crate::sink::MetricsSink;
use crate::workflow::Workflow;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};

/// A single virtual user: runs workflow iterations back to back until it is cancelled.
pub(crate) struct Worker<W, S> {
    id: usize,
    workflow: Arc<W>,
    sink: Arc<S>,
    iterations: Arc<AtomicU64>,
    pacing: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerReport {
    pub id: usize,
    pub iterations: u64,
}

impl<W, S> Worker<W, S>
where
    W: Workflow + 'static,
    S: MetricsSink + 'static,
{
    pub fn new(
        id: usize,
        workflow: Arc<W>,
        sink: Arc<S>,
        iterations: Arc<AtomicU64>,
        pacing: Duration,
    ) -> Self {
        Self {
            id,
            workflow,
            sink,
            iterations,
            pacing,
        }
    }

    /// Spawn onto the runtime, returning the handle the scheduler keeps for it.
    pub fn spawn(self) -> WorkerHandle {
        let id = self.id;
        let (cancel, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        WorkerHandle { id, cancel, task }
    }

    /// Cancellation is only observed between iterations. Once an iteration has started it runs to
    /// completion and all of its outcomes are reported.
    #[instrument(name = "vu", skip_all, fields(id = self.id))]
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> WorkerReport {
        let mut completed = 0;

        while !is_cancelled(&cancel) {
            let iteration = self.iterations.fetch_add(1, Ordering::Relaxed);

            let start = Instant::now();
            let outcomes = self.workflow.execute(iteration).await;
            let elapsed = start.elapsed();

            let mut passed = true;
            for outcome in &outcomes {
                if !outcome.passed() {
                    passed = false;
                    debug!(
                        iteration,
                        check = outcome.check.name,
                        "Check failed: {:?}",
                        outcome.request
                    );
                }
                self.sink.record_outcome(outcome);
                self.sink.record_check(outcome.check.name, outcome.check.passed);
            }
            self.sink.record_iteration(elapsed, passed);
            completed += 1;

            if !self.pacing.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.pacing) => {}
                    _ = cancel.changed() => {}
                }
            }
        }

        trace!("Exiting after {completed} iterations");
        WorkerReport {
            id: self.id,
            iterations: completed,
        }
    }
}

/// A dropped sender counts as cancellation, so a worker can never outlive its owner's interest.
fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || cancel.has_changed().is_err()
}

/// Opaque handle to a running VU. Only used to signal cancellation and detect termination.
pub(crate) struct WorkerHandle {
    id: usize,
    cancel: watch::Sender<bool>,
    task: JoinHandle<WorkerReport>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn cancel(&self) {
        // NOTE: Errors only if the worker is already gone.
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Force-abandon. Whatever the iteration in flight would have reported is lost.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn task(&mut self) -> &mut JoinHandle<WorkerReport> {
        &mut self.task
    }
}
