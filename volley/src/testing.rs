use crate::error::TransportError;
use crate::sink::MetricsSink;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::workflow::Workflow;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use volley_core::{CheckOutcome, Outcome, RequestOutcome};

type Responder = Box<dyn Fn(u64) -> Option<u16> + Send + Sync>;

/// Answers every request after `delay`. The responder maps the call index to a status, or to a
/// connection error when it returns `None`.
pub(crate) struct MockTransport {
    delay: Duration,
    responder: Responder,
    sent: AtomicU64,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn scripted(
        delay: Duration,
        responder: impl Fn(u64) -> Option<u16> + Send + Sync + 'static,
    ) -> Self {
        Self {
            delay,
            responder: Box::new(responder),
            sent: AtomicU64::new(0),
            requests: Mutex::new(vec![]),
        }
    }

    pub fn ok(delay: Duration) -> Self {
        Self::scripted(delay, |_| Some(200))
    }

    pub fn failing(delay: Duration) -> Self {
        Self::scripted(delay, |_| None)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let call = self.sent.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().unwrap().push(request);

        tokio::time::sleep(self.delay).await;

        match (self.responder)(call) {
            Some(status) => Ok(HttpResponse {
                status,
                latency: self.delay,
                bytes_received: 2,
            }),
            None => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}

/// Sleeps for `duration` and then reports a single passing check. Counts how many iterations were
/// started and how many ran to completion.
pub(crate) struct SleepyWorkflow {
    duration: Duration,
    pub started: AtomicU64,
    pub completed: AtomicU64,
}

impl SleepyWorkflow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Workflow for SleepyWorkflow {
    async fn execute(&self, _iteration: u64) -> Vec<Outcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.completed.fetch_add(1, Ordering::SeqCst);

        vec![Outcome {
            check: CheckOutcome {
                name: "slept",
                passed: true,
                timestamp: SystemTime::now(),
            },
            request: Some(RequestOutcome {
                name: "sleep",
                status: Some(200),
                latency: Some(self.duration),
                bytes_sent: 0,
                bytes_received: 0,
                error: None,
            }),
        }]
    }
}

/// Keeps everything it is given.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub outcomes: Mutex<Vec<Outcome>>,
    pub checks: Mutex<Vec<(String, bool)>>,
    pub iterations: AtomicU64,
    pub failed_iterations: AtomicU64,
    pub interrupted: AtomicU64,
    pub max_vus: AtomicUsize,
}

impl RecordingSink {
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn checks(&self) -> Vec<(String, bool)> {
        self.checks.lock().unwrap().clone()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::SeqCst)
    }
}

impl MetricsSink for RecordingSink {
    fn record_outcome(&self, outcome: &Outcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }

    fn record_check(&self, name: &str, passed: bool) {
        self.checks.lock().unwrap().push((name.to_string(), passed));
    }

    fn record_iteration(&self, _duration: Duration, passed: bool) {
        self.iterations.fetch_add(1, Ordering::SeqCst);
        if !passed {
            self.failed_iterations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record_vus(&self, active: usize) {
        self.max_vus.fetch_max(active, Ordering::SeqCst);
    }

    fn record_interrupted(&self, count: u64) {
        self.interrupted.fetch_add(count, Ordering::SeqCst);
    }
}
