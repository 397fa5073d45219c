//! The HTTP seam. The scheduler and workflow only ever need `send(request) -> response`.
use crate::error::TransportError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Both endpoints of the search service are `POST` only, so that is the only method sent.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// A `POST` with a JSON body and matching `Content-Type`.
    pub fn post_json(url: &str, body: &serde_json::Value) -> Self {
        Self {
            url: url.to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub latency: Duration,
    pub bytes_received: u64,
}

/// Executes a single request.
///
/// Any response, whatever its status, is `Ok`. `Err` is reserved for requests which never
/// produced one (refused connections, timeouts, broken bodies).
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

impl<T: Transport> Transport for &T {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

impl<T: Transport> Transport for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

#[cfg(feature = "http")]
pub use self::http::ReqwestTransport;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use std::time::Instant;

    /// [`Transport`] backed by a shared `reqwest` client (requires `http` feature).
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        /// Build a client whose requests give up after `timeout`.
        pub fn new(timeout: Duration) -> Result<Self, TransportError> {
            let client = reqwest::Client::builder().timeout(timeout).build()?;
            Ok(Self { client })
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl Transport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let HttpRequest { url, headers, body } = request;

            let mut builder = self.client.post(url);
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let start = Instant::now();
            let res = builder.body(body).send().await?;
            let status = res.status().as_u16();
            let bytes = res.bytes().await?;
            let latency = start.elapsed();

            Ok(HttpResponse {
                status,
                latency,
                bytes_received: bytes.len() as u64,
            })
        }
    }
}
