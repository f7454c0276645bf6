//! Legacy JSON cassette transport.
//!
//! A lower-fidelity alternative to wire traces: interactions are stored as a
//! pretty-printed JSON document and matched by a synthetic id built from the
//! method, the scheme/host/path of the URL and a short hash of the body. Query
//! strings and headers do not take part in matching.
//!
//! Cassettes and `.httprr` traces are separate formats; neither can be opened
//! as the other.
//!
//! # Environment Variables
//!
//! - `HTTPRR_CASSETTE_MODE`: `replay` (default), `record`, `off` (live network)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{HttprrError, HttprrResult};
use crate::matcher::scrub_clone;
use crate::scrub::default_request_scrubber;
use crate::transport::{Request, Response, Transport};
use crate::wire::canonical_header_name;

pub const CASSETTE_MODE_ENV: &str = "HTTPRR_CASSETTE_MODE";

/// How a [`CassetteTransport`] handles requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CassetteMode {
    /// Pass through to the real transport; nothing is stored.
    Disabled,
    /// Forward to the real transport and append to the cassette.
    Record,
    /// Answer from the cassette; fail if no match.
    #[default]
    Replay,
}

impl CassetteMode {
    /// Parse `HTTPRR_CASSETTE_MODE`.
    pub fn from_env() -> Self {
        match std::env::var(CASSETTE_MODE_ENV)
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "record" => Self::Record,
            "off" | "disabled" => Self::Disabled,
            _ => Self::Replay,
        }
    }
}

/// Header name to values, keyed by canonical name.
pub type RecordedHeaders = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cassette {
    pub name: String,
    pub interactions: Vec<CassetteInteraction>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CassetteInteraction {
    pub id: String,
    pub request: RecordedRequest,
    pub response: RecordedResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: RecordedHeaders,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// Status line text, e.g. `200 OK`.
    pub status: String,
    pub status_code: u16,
    pub headers: RecordedHeaders,
    pub body: String,
}

fn record_headers(headers: &HeaderMap) -> RecordedHeaders {
    let mut out = RecordedHeaders::new();
    for (name, value) in headers {
        out.entry(canonical_header_name(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Scheme, host and path only.
fn normalize_url(uri: &Uri) -> String {
    let scheme = uri.scheme_str().unwrap_or_default();
    let host = uri.authority().map(|a| a.as_str()).unwrap_or_default();
    if scheme.is_empty() {
        format!("//{host}{}", uri.path())
    } else {
        format!("{scheme}://{host}{}", uri.path())
    }
}

/// 16 hex chars of SHA-256 over `method-url-bodyhash`.
pub fn request_id(req: &Request) -> String {
    let body_hash = req
        .body()
        .as_ref()
        .map(|b| sha256_hex(b.as_bytes())[..8].to_string())
        .unwrap_or_default();
    let id = format!("{}-{}-{body_hash}", req.method(), normalize_url(req.uri()));
    sha256_hex(id.as_bytes())[..16].to_string()
}

impl Cassette {
    fn new(path: &Path) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            interactions: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> HttprrResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| HttprrError::Cassette {
            path: path.to_path_buf(),
            message: format!("failed to load cassette: {e}"),
        })?;
        serde_json::from_str(&data).map_err(|e| HttprrError::Cassette {
            path: path.to_path_buf(),
            message: format!("failed to parse cassette: {e}"),
        })
    }

    pub fn save(&self, path: &Path) -> HttprrResult<()> {
        let err = |message: String| HttprrError::Cassette {
            path: path.to_path_buf(),
            message,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| err(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| err(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| err(e.to_string()))
    }

    pub fn find(&self, id: &str) -> Option<&CassetteInteraction> {
        self.interactions.iter().find(|i| i.id == id)
    }
}

impl RecordedResponse {
    fn from_response(resp: &Response) -> Self {
        let status = resp.status();
        Self {
            status: match status.canonical_reason() {
                Some(reason) => format!("{} {reason}", status.as_u16()),
                None => status.as_u16().to_string(),
            },
            status_code: status.as_u16(),
            headers: record_headers(resp.headers()),
            body: String::from_utf8_lossy(resp.body()).into_owned(),
        }
    }

    fn to_response(&self, path: &Path) -> HttprrResult<Response> {
        let err = |message: String| HttprrError::Cassette {
            path: path.to_path_buf(),
            message,
        };
        let mut resp = Response::new(Bytes::from(self.body.clone()));
        *resp.status_mut() =
            StatusCode::from_u16(self.status_code).map_err(|e| err(e.to_string()))?;
        for (name, values) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| err(e.to_string()))?;
            for value in values {
                let value = HeaderValue::from_str(value).map_err(|e| err(e.to_string()))?;
                resp.headers_mut().append(name.clone(), value);
            }
        }
        Ok(resp)
    }
}

/// Transport that records to, or replays from, one JSON cassette.
pub struct CassetteTransport {
    real: Arc<dyn Transport>,
    mode: CassetteMode,
    path: PathBuf,
    cassette: Mutex<Option<Cassette>>,
}

impl std::fmt::Debug for CassetteTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CassetteTransport")
            .field("mode", &self.mode)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CassetteTransport {
    pub fn new<T: Transport + 'static>(path: impl Into<PathBuf>, mode: CassetteMode, transport: T) -> Self {
        Self {
            real: Arc::new(transport),
            mode,
            path: path.into(),
            cassette: Mutex::new(None),
        }
    }

    /// Mode from `HTTPRR_CASSETTE_MODE`.
    pub fn from_env<T: Transport + 'static>(path: impl Into<PathBuf>, transport: T) -> Self {
        Self::new(path, CassetteMode::from_env(), transport)
    }

    pub fn mode(&self) -> CassetteMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn record(&self, req: Request) -> HttprrResult<Response> {
        let id = request_id(&req);
        // credentials never reach the cassette
        let mut snapshot = scrub_clone(&req);
        default_request_scrubber(&mut snapshot).map_err(HttprrError::Scrub)?;
        let request = RecordedRequest {
            method: snapshot.method().to_string(),
            url: snapshot.uri().to_string(),
            headers: record_headers(snapshot.headers()),
            body: snapshot
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b.as_bytes()).into_owned())
                .unwrap_or_default(),
        };

        let resp = self.real.round_trip(req).await?;

        let mut guard = self.cassette.lock().await;
        let cassette = guard.get_or_insert_with(|| {
            Cassette::load(&self.path).unwrap_or_else(|e| {
                debug!(path = %self.path.display(), error = %e, "starting new cassette");
                Cassette::new(&self.path)
            })
        });
        cassette.interactions.push(CassetteInteraction {
            id,
            request,
            response: RecordedResponse::from_response(&resp),
        });
        if let Err(e) = cassette.save(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to save cassette");
            return Err(e);
        }
        Ok(resp)
    }

    async fn replay(&self, req: Request) -> HttprrResult<Response> {
        let mut guard = self.cassette.lock().await;
        if guard.is_none() {
            *guard = Some(Cassette::load(&self.path)?);
        }
        let id = request_id(&req);
        let found = guard.as_ref().and_then(|c| c.find(&id));
        match found {
            Some(interaction) => interaction.response.to_response(&self.path),
            None => Err(HttprrError::NoCachedResponse {
                method: req.method().to_string(),
                url: normalize_url(req.uri()),
                key: id,
            }),
        }
    }
}

#[async_trait]
impl Transport for CassetteTransport {
    async fn round_trip(&self, req: Request) -> HttprrResult<Response> {
        match self.mode {
            CassetteMode::Disabled => self.real.round_trip(req).await,
            CassetteMode::Record => self.record(req).await,
            CassetteMode::Replay => self.replay(req).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::error::ErrorKind;
    use crate::transport::{build_request, Client, NoNetwork};
    use http::header::AUTHORIZATION;
    use http::Method;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn round_trip(&self, req: Request) -> HttprrResult<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut resp = Response::new(Bytes::from(format!("echo {}", req.uri().path())));
            resp.headers_mut()
                .insert("content-type", HeaderValue::from_static("text/plain"));
            Ok(resp)
        }
    }

    fn post(url: &str, body: &str) -> Request {
        build_request(Method::POST, url, Some(Body::new(body))).unwrap()
    }

    #[test]
    fn request_id_is_stable_and_body_sensitive() {
        let a = request_id(&post("https://api.example.com/v1/embeddings", "hello"));
        let b = request_id(&post("https://api.example.com/v1/embeddings", "hello"));
        let c = request_id(&post("https://api.example.com/v1/embeddings", "world"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);

        // query strings do not take part in matching
        let d = request_id(&post("https://api.example.com/v1/embeddings?x=1", "hello"));
        assert_eq!(a, d);
    }

    #[test]
    #[serial]
    fn mode_from_env() {
        std::env::remove_var(CASSETTE_MODE_ENV);
        assert_eq!(CassetteMode::from_env(), CassetteMode::Replay);

        std::env::set_var(CASSETTE_MODE_ENV, "record");
        assert_eq!(CassetteMode::from_env(), CassetteMode::Record);

        std::env::set_var(CASSETTE_MODE_ENV, "OFF");
        assert_eq!(CassetteMode::from_env(), CassetteMode::Disabled);

        std::env::remove_var(CASSETTE_MODE_ENV);
    }

    #[tokio::test]
    async fn record_then_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cassettes/chat.json");

        let rec = Client::new(Arc::new(CassetteTransport::new(
            &path,
            CassetteMode::Record,
            Echo::default(),
        )));
        let mut req = post("https://api.example.com/v1/chat", "{\"q\":1}");
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk-live-secret"));
        rec.send(req).await.unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(!saved.contains("sk-live-secret"));
        let cassette = Cassette::load(&path).unwrap();
        assert_eq!(cassette.name, "chat.json");
        assert_eq!(cassette.interactions.len(), 1);
        assert_eq!(cassette.interactions[0].response.status, "200 OK");

        let play = Client::new(Arc::new(CassetteTransport::new(
            &path,
            CassetteMode::Replay,
            NoNetwork,
        )));
        let resp = play
            .send(post("https://api.example.com/v1/chat", "{\"q\":1}"))
            .await
            .unwrap();
        assert_eq!(resp.body().as_ref(), b"echo /v1/chat");
        assert_eq!(resp.headers()["content-type"], "text/plain");

        let err = play
            .send(post("https://api.example.com/v1/chat", "{\"q\":2}"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Miss);
    }

    #[tokio::test]
    async fn replay_without_cassette_fails() {
        let dir = TempDir::new().unwrap();
        let t = CassetteTransport::new(dir.path().join("none.json"), CassetteMode::Replay, NoNetwork);
        let err = t
            .round_trip(build_request(Method::GET, "http://h/x", None).unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to load cassette"));
    }

    #[tokio::test]
    async fn disabled_passes_through_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("off.json");
        let echo = Arc::new(Echo::default());
        let t = CassetteTransport::new(&path, CassetteMode::Disabled, echo.clone());
        t.round_trip(build_request(Method::GET, "http://h/x", None).unwrap())
            .await
            .unwrap();
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
    }
}
