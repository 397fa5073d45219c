use std::fmt;
use std::time::{Duration, SystemTime};

/// Why a request (or the iteration around it) did not produce a usable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Could not connect to the target.
    Connection,
    /// The transport gave up waiting on the response.
    Timeout,
    /// A response arrived, but with a non-2xx status.
    Status,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Status => "status",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// A named pass/fail assertion evaluated once per workflow step.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub timestamp: SystemTime,
}

/// What happened to a single request. `status` and `latency` are `None` when the transport
/// never produced a response, in which case nothing is counted as sent either.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub name: &'static str,
    pub status: Option<u16>,
    pub latency: Option<Duration>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub error: Option<ErrorKind>,
}

impl RequestOutcome {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// The result of one workflow step: the check, and the request it was evaluated against (if one
/// was ever sent).
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub check: CheckOutcome,
    pub request: Option<RequestOutcome>,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.check.passed
    }
}
