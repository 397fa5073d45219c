//! What a single VU does on each iteration.
use crate::payload::PayloadProducer;
use crate::transport::{HttpRequest, Transport};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::time::SystemTime;
#[allow(unused)]
use tracing::{debug, error, trace, warn};
use volley_core::{
    CheckOutcome, ErrorKind, Outcome, RequestOutcome, TargetConfig, QUERY_CHECK, QUERY_REQUEST,
    SUBMISSION_CHECK, SUBMISSION_REQUEST,
};

/// An ordered sequence of requests plus the checks evaluated against them.
///
/// `execute` must never fail as a whole: every problem is turned into a failed [`Outcome`] so
/// that the calling VU can simply move on to the next iteration.
pub trait Workflow: Send + Sync {
    fn execute(&self, iteration: u64) -> impl Future<Output = Vec<Outcome>> + Send;
}

/// Submits a corpus snippet as a document, then searches for that same snippet.
///
/// Both steps always run, and each is checked on its own. A failed submission does not skip or
/// fail the query.
///
/// A single workflow is shared by every VU, so the target's `max_rps` caps the whole run. Time
/// spent waiting on that limit is not counted as request latency.
pub struct SearchWorkflow<P, T> {
    producer: P,
    transport: T,
    limiter: Option<DefaultDirectRateLimiter>,
    submission_url: String,
    query_url: String,
}

impl<P, T> SearchWorkflow<P, T>
where
    P: PayloadProducer,
    T: Transport,
{
    pub fn new(producer: P, transport: T, target: &TargetConfig) -> Self {
        Self {
            producer,
            transport,
            limiter: target.max_rps.map(rate_limiter),
            submission_url: target.submission_url(),
            query_url: target.query_url(),
        }
    }

    async fn step(
        &self,
        request_name: &'static str,
        check_name: &'static str,
        request: HttpRequest,
    ) -> Outcome {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let bytes_sent = request.body.len() as u64;
        let result = self.transport.send(request).await;

        let request = match result {
            Ok(res) => RequestOutcome {
                name: request_name,
                status: Some(res.status),
                latency: Some(res.latency),
                bytes_sent,
                bytes_received: res.bytes_received,
                error: (!(200..300).contains(&res.status)).then_some(ErrorKind::Status),
            },
            Err(err) => {
                debug!("{request_name} request failed: {err}");
                RequestOutcome {
                    name: request_name,
                    status: None,
                    latency: None,
                    bytes_sent: 0,
                    bytes_received: 0,
                    error: Some(err.kind()),
                }
            }
        };

        Outcome {
            check: CheckOutcome {
                name: check_name,
                passed: request.status == Some(200),
                timestamp: SystemTime::now(),
            },
            request: Some(request),
        }
    }
}

impl<P, T> Workflow for SearchWorkflow<P, T>
where
    P: PayloadProducer,
    T: Transport,
{
    async fn execute(&self, iteration: u64) -> Vec<Outcome> {
        let payload = match self.producer.produce(iteration) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(iteration, "Unable to produce payload: {err}");
                return vec![unsent(SUBMISSION_CHECK), unsent(QUERY_CHECK)];
            }
        };
        let text = String::from_utf8_lossy(&payload).into_owned();

        let submission = serde_json::json!({ "documents": [{ "data": &text }] });
        let query = serde_json::json!({ "query": &text });

        // NOTE: Sequential on purpose, the query must not be issued before the submission has
        // finished.
        let submitted = self
            .step(
                SUBMISSION_REQUEST,
                SUBMISSION_CHECK,
                HttpRequest::post_json(&self.submission_url, &submission),
            )
            .await;
        let queried = self
            .step(
                QUERY_REQUEST,
                QUERY_CHECK,
                HttpRequest::post_json(&self.query_url, &query),
            )
            .await;

        vec![submitted, queried]
    }
}

fn rate_limiter(max_rps: NonZeroU32) -> DefaultDirectRateLimiter {
    // NOTE: No burst, so requests are spread evenly over each second.
    RateLimiter::direct(Quota::per_second(max_rps).allow_burst(NonZeroU32::MIN))
}

fn unsent(check_name: &'static str) -> Outcome {
    Outcome {
        check: CheckOutcome {
            name: check_name,
            passed: false,
            timestamp: SystemTime::now(),
        },
        request: None,
    }
}
