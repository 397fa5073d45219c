//! A stand-in for the search service under test: accepts documents and answers queries, with a
//! configurable delay, failure ratio and throughput cap.
use axum::{
    debug_handler, extract::State, http::StatusCode, routing::post, Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics::{counter, gauge};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::debug;

pub const SUBMISSION_PATH: &str = "/v1/load-test";
pub const QUERY_PATH: &str = "/v1/load-test/search";

/// Only the most recent documents are kept (and searched). Older ones are still counted.
pub const MAX_STORED_DOCUMENTS: usize = 10_000;

/// How the service misbehaves.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Mean handler delay. Actual delays are normally distributed around it.
    pub delay: Duration,
    /// Fraction of requests, in `[0, 1]`, answered with a 500.
    pub failure_ratio: f64,
    /// Requests per second beyond which requests get a 429.
    pub max_tps: Option<NonZeroU32>,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct Submission {
    pub documents: Vec<Document>,
}

#[derive(Debug, Deserialize)]
pub struct Query {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Indexed {
    pub indexed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Hits {
    pub hits: usize,
}

/// Shared service state, also handy for asserting on what a load test actually sent.
#[derive(Default)]
pub struct ServiceState {
    config: ServiceConfig,
    limiter: Option<DefaultDirectRateLimiter>,
    documents: RwLock<VecDeque<String>>,
    indexed: AtomicU64,
    submissions: AtomicU64,
    queries: AtomicU64,
    failures: AtomicU64,
}

impl ServiceState {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            limiter: config.max_tps.map(rate_limiter),
            config,
            ..Default::default()
        }
    }

    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Requests answered with anything but a 200.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Every document ever indexed, including those since evicted.
    pub fn documents(&self) -> u64 {
        self.indexed.load(Ordering::Relaxed)
    }

    pub fn stored_documents(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or_default()
    }

    /// Applies the configured delay, rate limit and failure ratio to a single request.
    async fn admit(&self) -> Result<(), StatusCode> {
        TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
        counter!("mock-server.tps").increment(1);

        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                debug!("Rate limited");
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(StatusCode::TOO_MANY_REQUESTS);
            }
        }

        if self.config.failure_ratio > 0. && rand::thread_rng().gen_bool(self.failure_ratio()) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }

        Ok(())
    }

    fn delay(&self) -> Duration {
        let mean = self.config.delay.as_secs_f64();
        match Normal::new(mean, mean / 10.) {
            Ok(normal) => Duration::from_secs_f64(normal.sample(&mut rand::thread_rng()).max(0.)),
            Err(_) => self.config.delay,
        }
    }

    fn failure_ratio(&self) -> f64 {
        self.config.failure_ratio.clamp(0., 1.)
    }
}

pub fn router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route(SUBMISSION_PATH, post(submit))
        .route(QUERY_PATH, post(search))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: Arc<ServiceState>) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[debug_handler]
pub async fn submit(
    State(state): State<Arc<ServiceState>>,
    Json(submission): Json<Submission>,
) -> Result<Json<Indexed>, StatusCode> {
    state.submissions.fetch_add(1, Ordering::Relaxed);
    state.admit().await?;

    let indexed = submission.documents.len();
    let mut documents = state
        .documents
        .write()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    for document in submission.documents {
        if documents.len() == MAX_STORED_DOCUMENTS {
            documents.pop_front();
        }
        documents.push_back(document.data);
    }
    state.indexed.fetch_add(indexed as u64, Ordering::Relaxed);

    Ok(Json(Indexed { indexed }))
}

#[debug_handler]
pub async fn search(
    State(state): State<Arc<ServiceState>>,
    Json(query): Json<Query>,
) -> Result<Json<Hits>, StatusCode> {
    state.queries.fetch_add(1, Ordering::Relaxed);
    state.admit().await?;

    let documents = state
        .documents
        .read()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let hits = documents.iter().filter(|d| d.contains(&query.query)).count();

    Ok(Json(Hits { hits }))
}

/** Utils **/

pub fn rate_limiter(tps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(tps))
}

/** TPS Printer **/

static TPS_MEASURE: AtomicU64 = AtomicU64::new(0);

pub async fn tps_measure_task() {
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let transactions = TPS_MEASURE.swap(0, Ordering::Relaxed);
        gauge!("mock-server.tps").set(transactions as f64);
        println!("{transactions} TPS");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn(config: ServiceConfig) -> (String, Arc<ServiceState>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServiceState::new(config));
        tokio::spawn(serve(listener, state.clone()));
        (format!("http://{addr}"), state)
    }

    #[tokio::test]
    async fn submit_then_search() {
        let (base, state) = spawn(ServiceConfig::default()).await;
        let client = reqwest::Client::new();

        let res = client
            .post(format!("{base}{SUBMISSION_PATH}"))
            .json(&serde_json::json!({"documents": [{"data": "brown fox"}]}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.json::<Indexed>().await.unwrap().indexed, 1);

        let res = client
            .post(format!("{base}{QUERY_PATH}"))
            .json(&serde_json::json!({"query": "fox"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.json::<Hits>().await.unwrap().hits, 1);

        assert_eq!(state.submissions(), 1);
        assert_eq!(state.queries(), 1);
        assert_eq!(state.documents(), 1);
        assert_eq!(state.stored_documents(), 1);
    }

    #[tokio::test]
    async fn document_store_is_capped() {
        let (base, state) = spawn(ServiceConfig::default()).await;
        let client = reqwest::Client::new();

        let documents: Vec<_> = (0..MAX_STORED_DOCUMENTS + 5)
            .map(|i| serde_json::json!({ "data": format!("doc-{i}.") }))
            .collect();
        let res = client
            .post(format!("{base}{SUBMISSION_PATH}"))
            .json(&serde_json::json!({ "documents": documents }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(state.documents(), MAX_STORED_DOCUMENTS as u64 + 5);
        assert_eq!(state.stored_documents(), MAX_STORED_DOCUMENTS);

        let hits = |query: String| {
            let client = client.clone();
            let url = format!("{base}{QUERY_PATH}");
            async move {
                let res = client
                    .post(url)
                    .json(&serde_json::json!({ "query": query }))
                    .send()
                    .await
                    .unwrap();
                res.json::<Hits>().await.unwrap().hits
            }
        };
        // The oldest documents were evicted, the newest are still searchable.
        assert_eq!(hits("doc-0.".to_string()).await, 0);
        assert_eq!(hits(format!("doc-{}.", MAX_STORED_DOCUMENTS + 4)).await, 1);
    }

    #[tokio::test]
    async fn configured_failures() {
        let (base, state) = spawn(ServiceConfig {
            failure_ratio: 1.,
            ..Default::default()
        })
        .await;

        let res = reqwest::Client::new()
            .post(format!("{base}{QUERY_PATH}"))
            .json(&serde_json::json!({"query": "fox"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 500);
        assert_eq!(state.failures(), 1);
    }

    #[tokio::test]
    async fn malformed_bodies_are_rejected() {
        let (base, _state) = spawn(ServiceConfig::default()).await;

        let res = reqwest::Client::new()
            .post(format!("{base}{SUBMISSION_PATH}"))
            .json(&serde_json::json!({"query": "fox"}))
            .send()
            .await
            .unwrap();
        assert!(res.status().is_client_error());
    }
}
