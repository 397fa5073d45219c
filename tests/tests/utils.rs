use mock_service::{serve, ServiceConfig, ServiceState};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tracing::error;
use tracing_subscriber::FmtSubscriber;
use volley::core::TargetConfig;

pub const CORPUS: &str = "It was the best of times, it was the worst of times, it was the age \
    of wisdom, it was the age of foolishness, it was the epoch of belief, it was the epoch of \
    incredulity, it was the season of Light, it was the season of Darkness.";

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        FmtSubscriber::builder()
            .with_env_filter("volley=debug,mock_service=info")
            .init();
    });
}

/// Start a mock search service on an ephemeral port, returning a target pointing at it.
#[allow(unused)]
pub async fn spawn_service(config: ServiceConfig) -> (TargetConfig, Arc<ServiceState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServiceState::new(config));

    tokio::spawn(serve(listener, state.clone()));

    (TargetConfig::new(&format!("http://{addr}")), state)
}

/// An address nothing is listening on.
#[allow(unused)]
pub async fn unused_target() -> TargetConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    TargetConfig::new(&format!("http://{addr}"))
}
