//! Names used when emitting through the `metrics` facade.

pub const HTTP_REQS: &str = "volley_http_reqs";
pub const HTTP_REQ_FAILED: &str = "volley_http_req_failed";
pub const HTTP_REQ_DURATION: &str = "volley_http_req_duration";
pub const CHECKS_PASSED: &str = "volley_checks_passed";
pub const CHECKS_FAILED: &str = "volley_checks_failed";
pub const ITERATIONS: &str = "volley_iterations";
pub const ITERATIONS_FAILED: &str = "volley_iterations_failed";
pub const ITERATIONS_INTERRUPTED: &str = "volley_iterations_interrupted";
pub const ITERATION_DURATION: &str = "volley_iteration_duration";
pub const DATA_SENT: &str = "volley_data_sent";
pub const DATA_RECEIVED: &str = "volley_data_received";
pub const VUS: &str = "volley_vus";

/// Label key attached to request and check metrics.
pub const NAME_LABEL: &str = "name";
