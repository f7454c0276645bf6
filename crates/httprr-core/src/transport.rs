//! Transport seam and the client handle handed to API clients.
//!
//! Anything that can execute a [`Request`] implements [`Transport`]: the real
//! network ([`ReqwestTransport`]), the record/replay engine, and the legacy
//! cassette transport. [`Client`] is the thin handle consumers hold.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use tracing::debug;

use crate::body::Body;
use crate::error::{HttprrError, HttprrResult};

/// Request with an optional re-readable body.
pub type Request = http::Request<Option<Body>>;

/// Response with a fully buffered body.
pub type Response = http::Response<Bytes>;

/// Executes one HTTP exchange. Implementations must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, req: Request) -> HttprrResult<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(&self, req: Request) -> HttprrResult<Response> {
        (**self).round_trip(req).await
    }
}

/// Real network transport backed by `reqwest`.
///
/// Redirects are not followed; the response is handed back as received.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> HttprrResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (timeouts, proxies, TLS roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, req: Request) -> HttprrResult<Response> {
        let (parts, body) = req.into_parts();
        let body = body.map(|b| b.data).unwrap_or_default();
        let req = reqwest::Request::try_from(http::Request::from_parts(parts, body))?;

        // query strings may carry credentials
        debug!(
            method = %req.method(),
            host = req.url().host_str().unwrap_or_default(),
            path = req.url().path(),
            "sending real request"
        );
        let resp = self.client.execute(req).await?;

        let status = resp.status();
        let version = resp.version();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;

        let mut out = Response::new(body);
        *out.status_mut() = status;
        *out.version_mut() = version;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

/// Transport for replay-only sessions: any real call is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNetwork;

#[async_trait]
impl Transport for NoNetwork {
    async fn round_trip(&self, _req: Request) -> HttprrResult<Response> {
        Err(HttprrError::NoTransport)
    }
}

/// Client handle over any transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn send(&self, req: Request) -> HttprrResult<Response> {
        self.transport.round_trip(req).await
    }

    pub async fn get(&self, url: &str) -> HttprrResult<Response> {
        self.send(build_request(Method::GET, url, None)?).await
    }

    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> HttprrResult<Response> {
        let mut req = build_request(Method::POST, url, Some(body.into()))?;
        let value =
            HeaderValue::from_str(content_type).map_err(|e| HttprrError::InvalidRequest {
                message: format!("content type {content_type:?}: {e}"),
            })?;
        req.headers_mut().insert(CONTENT_TYPE, value);
        self.send(req).await
    }
}

/// Build a request, mapping builder failures to [`HttprrError::InvalidRequest`].
pub fn build_request(method: Method, url: &str, body: Option<Body>) -> HttprrResult<Request> {
    http::Request::builder()
        .method(method)
        .uri(url)
        .body(body)
        .map_err(|e| HttprrError::InvalidRequest {
            message: format!("{url}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_network_refuses_calls() {
        let client = Client::new(Arc::new(NoNetwork));
        let err = client.get("http://127.0.0.1/x").await.unwrap_err();
        assert!(matches!(err, HttprrError::NoTransport));
    }

    #[test]
    fn build_request_rejects_bad_uri() {
        let err = build_request(Method::GET, "http://exa mple.com/", None).unwrap_err();
        assert!(matches!(err, HttprrError::InvalidRequest { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Request);
    }

    #[tokio::test]
    async fn post_sets_content_type_and_body() {
        struct Echo;

        #[async_trait]
        impl Transport for Echo {
            async fn round_trip(&self, req: Request) -> HttprrResult<Response> {
                let ct = req.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
                let body = req.into_body().unwrap_or_default();
                Ok(Response::new(Bytes::from(format!(
                    "{ct}|{}",
                    String::from_utf8_lossy(&body.data)
                ))))
            }
        }

        let client = Client::new(Arc::new(Echo));
        let resp = client
            .post("http://h/x", "text/plain", "hello")
            .await
            .unwrap();
        assert_eq!(resp.body().as_ref(), b"text/plain|hello");
    }
}
