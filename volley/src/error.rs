use thiserror::Error;
use volley_core::ErrorKind;

pub use volley_core::ConfigError;

/// A request that never produced a response.
///
/// Non-2xx responses are *not* transport errors; they come back as a normal response and are
/// judged by the workflow's checks.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Connect(_) => ErrorKind::Connection,
            TransportError::Timeout => ErrorKind::Timeout,
            TransportError::Request(_) => ErrorKind::Other,
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("unable to read corpus: {0}")]
    Io(#[from] std::io::Error),
}
