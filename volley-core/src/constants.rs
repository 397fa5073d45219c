use std::time::Duration;

/// How often the ramp scheduler recomputes the desired VU count.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// How long a stopping run waits for in-flight iterations before abandoning them.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Length (in characters) of the corpus snippet sent with each iteration.
pub const DEFAULT_SNIPPET_LEN: usize = 50;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_SUBMISSION_PATH: &str = "/v1/load-test";
pub const DEFAULT_QUERY_PATH: &str = "/v1/load-test/search";

pub const SUBMISSION_CHECK: &str = "submission succeeded";
pub const QUERY_CHECK: &str = "query succeeded";

pub const SUBMISSION_REQUEST: &str = "submission";
pub const QUERY_REQUEST: &str = "query";
