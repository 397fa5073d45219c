mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;
    use mock_service::ServiceConfig;
    use std::num::NonZeroU32;
    use std::sync::Arc;
    use std::time::Duration;
    use volley::core::{ErrorKind, QUERY_CHECK, SUBMISSION_CHECK};
    use volley::prelude::*;

    fn config(stages: &[(u64, usize)]) -> RunConfig {
        RunConfig::new(
            stages
                .iter()
                .map(|&(ms, target)| StageConfig::new(Duration::from_millis(ms), target))
                .collect(),
        )
        .with_reconcile_interval(Duration::from_millis(100))
        .with_grace_period(Duration::from_secs(5))
    }

    fn workflow(
        target: &TargetConfig,
    ) -> Arc<SearchWorkflow<CorpusSampler, ReqwestTransport>> {
        let sampler = CorpusSampler::new(CORPUS, target.snippet_len).unwrap();
        let transport = ReqwestTransport::new(target.request_timeout).unwrap();
        Arc::new(SearchWorkflow::new(sampler, transport, target))
    }

    #[tokio::test]
    async fn healthy_service() {
        init();
        let (target, state) = spawn_service(ServiceConfig {
            delay: Duration::from_millis(5),
            ..Default::default()
        })
        .await;

        let stats = run_load_test(&config(&[(1_000, 8), (1_000, 8), (500, 0)]), workflow(&target))
            .await
            .unwrap();
        println!("{stats}");

        assert!(stats.iterations > 0);
        assert_eq!(stats.check_pass_rate(), 1.);
        assert_eq!(stats.failed_requests, 0);
        assert_eq!(stats.max_vus, 8);
        assert_eq!(stats.requests, state.submissions() + state.queries());
        assert_eq!(state.submissions(), stats.iterations);
        assert_eq!(state.queries(), stats.iterations);
        assert_eq!(stats.check(SUBMISSION_CHECK).unwrap().passed, stats.iterations);
        assert_eq!(stats.check(QUERY_CHECK).unwrap().passed, stats.iterations);
        assert!(stats.latency.p50 >= Duration::from_millis(4));
        assert!(stats.latency.p50 <= stats.latency.p99);
        assert!(stats.bytes_received > 0);
        assert!(stats.bytes_sent > 0);
        assert!(stats.iteration_duration.min >= 2 * Duration::from_millis(5));
        assert_eq!(stats.interrupted_iterations, 0);
    }

    #[tokio::test]
    async fn failing_service() {
        init();
        let (target, state) = spawn_service(ServiceConfig {
            failure_ratio: 1.,
            ..Default::default()
        })
        .await;

        let stats = run_load_test(&config(&[(500, 4), (500, 0)]), workflow(&target))
            .await
            .unwrap();

        assert!(stats.iterations > 0);
        assert_eq!(stats.checks_passed(), 0);
        assert_eq!(stats.failed_iterations, stats.iterations);
        assert_eq!(stats.failed_requests, stats.requests);
        assert_eq!(state.failures(), stats.requests);
    }

    #[tokio::test]
    async fn unreachable_service() {
        init();
        let target = unused_target().await;
        let workflow = workflow(&target);
        let sink = Arc::new(SummarySink::new());
        let scheduler = RampScheduler::new(workflow.clone(), sink.clone());

        scheduler.start(&config(&[(500, 2), (300, 0)])).unwrap();
        scheduler.wait().await;
        assert_eq!(scheduler.phase(), RunPhase::Stopped);

        let stats = sink.summary(scheduler.status().elapsed);
        assert!(stats.requests > 0);
        assert_eq!(stats.checks_passed(), 0);
        assert_eq!(stats.failed_requests, stats.requests);
        // Nothing was ever answered.
        assert_eq!(stats.bytes_received, 0);

        let outcome = workflow.execute(0).await;
        let request = outcome[0].request.as_ref().unwrap();
        assert_eq!(request.error, Some(ErrorKind::Connection));
        assert_eq!(request.status, None);
    }

    #[tokio::test]
    async fn rate_limited_run() {
        init();
        let (target, state) = spawn_service(ServiceConfig::default()).await;
        let target = target.with_max_rps(NonZeroU32::new(40).unwrap());

        let stats = run_load_test(&config(&[(0, 10), (2_000, 10)]), workflow(&target))
            .await
            .unwrap();

        // 40 rps for as long as the run lasted (draining included), plus the first request.
        let ceiling = 40. * stats.elapsed.as_secs_f64() + 2.;
        assert!(stats.requests as f64 <= ceiling, "{} > {ceiling}", stats.requests);
        assert!(stats.requests >= 40, "{}", stats.requests);
        assert_eq!(stats.check_pass_rate(), 1.);
        assert_eq!(state.failures(), 0);
    }

    #[tokio::test]
    async fn stop_mid_run() {
        init();
        let (target, state) = spawn_service(ServiceConfig {
            delay: Duration::from_millis(20),
            ..Default::default()
        })
        .await;

        let sink = Arc::new(SummarySink::new());
        let scheduler = RampScheduler::new(workflow(&target), sink.clone());
        scheduler.start(&config(&[(60_000, 20)])).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.phase(), RunPhase::Ramping);
        scheduler.stop().await;

        let status = scheduler.status();
        assert_eq!(status.phase, RunPhase::Stopped);
        assert!(status.elapsed < Duration::from_secs(5));

        // Every request that reached the service was fully reported.
        let stats = sink.summary(status.elapsed);
        assert_eq!(stats.requests, state.submissions() + state.queries());
        assert_eq!(stats.check_pass_rate(), 1.);
    }
}
