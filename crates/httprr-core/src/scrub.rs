//! Request and response canonicalization.
//!
//! Request scrubbers mutate a cloned [`Request`] before it becomes a trace key.
//! Response scrubbers rewrite the serialized response bytes before they are
//! persisted. Both run in registration order and must be deterministic, since
//! replay recomputes keys with the same pipeline.
//!
//! Every engine starts with [`default_request_scrubber`] and
//! [`default_response_scrubber`] so provider credentials, session cookies and
//! SDK version strings never reach a trace file.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST, SET_COOKIE, USER_AGENT};
use http::uri::PathAndQuery;
use http::{HeaderName, HeaderValue, Method, Uri};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::{HttprrError, HttprrResult};
use crate::transport::{Request, Response};
use crate::wire::{host_port, read_response, write_response};

/// Rewrites a cloned request in place.
pub type RequestScrubber = Arc<dyn Fn(&mut Request) -> anyhow::Result<()> + Send + Sync>;

/// Rewrites a serialized response in place. May change its length.
pub type ResponseScrubber = Arc<dyn Fn(&mut Vec<u8>) -> anyhow::Result<()> + Send + Sync>;

/// Placeholder written over credentials.
pub const TEST_API_KEY: &str = "test-api-key";
const TEST_ORGANIZATION: &str = "httprr-tst";
const TEST_USER_AGENT: &str = "httprr";
const TEST_REQUEST_ID: &str = "test-request-id";

const OPENAI_ORGANIZATION: &str = "openai-organization";
const OPENAI_PROJECT: &str = "openai-project";
const GOOG_API_CLIENT: &str = "x-goog-api-client";
const AMZ_USER_AGENT: &str = "x-amz-user-agent";
const MS_CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
const CF_RAY: &str = "cf-ray";

lazy_static! {
    /// `/1.24.4`, `/v0.15.1`, `/1.2`
    static ref GOOG_VERSION: Regex = Regex::new(r"(/v?)(\d+\.\d+(?:\.\d+)?)").unwrap();
    static ref GO_VERSION: Regex = Regex::new(r"\bgo\d+\.\d+(\.\d+)?\b").unwrap();
    static ref DOT_DATE: Regex = Regex::new(r"\b20\d{2}\.\d{2}\.\d{2}\b").unwrap();
    static ref DASH_DATE: Regex = Regex::new(r"\b20\d{2}-\d{2}-\d{2}\b").unwrap();
    static ref COMPACT_DATE: Regex = Regex::new(r"\b20\d{6}\b").unwrap();
    /// Applied last so date and go versions are already masked.
    static ref SEMVER: Regex =
        Regex::new(r"\bv?\d+\.\d+(\.\d+)?(-[a-zA-Z0-9.]+)?(\+[a-zA-Z0-9.]+)?\b").unwrap();
}

/// Ordered request and response scrubbers.
#[derive(Clone, Default)]
pub struct ScrubPipeline {
    request: Vec<RequestScrubber>,
    response: Vec<ResponseScrubber>,
}

impl fmt::Debug for ScrubPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrubPipeline")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .finish()
    }
}

impl ScrubPipeline {
    /// Empty pipeline. Requests and responses are stored as sent and received.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline preloaded with the default credential scrubbers.
    pub fn with_defaults() -> Self {
        let mut p = Self::new();
        p.add_request(default_request_scrubber);
        p.add_response(default_response_scrubber);
        p
    }

    pub fn add_request<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Request) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.request.push(Arc::new(f));
        self
    }

    pub fn add_response<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Vec<u8>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.response.push(Arc::new(f));
        self
    }

    pub fn request_scrubbers(&self) -> usize {
        self.request.len()
    }

    pub fn response_scrubbers(&self) -> usize {
        self.response.len()
    }

    pub(crate) fn scrub_request(&self, req: &mut Request) -> HttprrResult<()> {
        for scrub in &self.request {
            scrub(req).map_err(HttprrError::Scrub)?;
        }
        Ok(())
    }

    pub(crate) fn scrub_response(&self, buf: &mut Vec<u8>) -> HttprrResult<()> {
        for scrub in &self.response {
            scrub(buf).map_err(HttprrError::Scrub)?;
        }
        Ok(())
    }
}

fn is_secret_header(name: &str) -> bool {
    name.contains("api-key") || name.contains("api-token") || name.contains("token") || name == "authorization"
}

fn is_secret_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    ["api_key", "api-key", "api-token", "token", "key"]
        .iter()
        .any(|p| name.contains(p))
}

fn header_str<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Replace credentials and version noise in request headers and query.
pub fn default_request_scrubber(req: &mut Request) -> anyhow::Result<()> {
    let names: Vec<HeaderName> = req.headers().keys().cloned().collect();
    for name in names.iter().filter(|n| is_secret_header(n.as_str())) {
        let value = if *name == AUTHORIZATION {
            // keep the scheme (Bearer, Basic, ...)
            match header_str(req, AUTHORIZATION.as_str()).and_then(|v| v.split_once(' ')) {
                Some((scheme, _)) => format!("{scheme} {TEST_API_KEY}"),
                None => TEST_API_KEY.to_string(),
            }
        } else {
            TEST_API_KEY.to_string()
        };
        req.headers_mut()
            .insert(name.clone(), HeaderValue::from_str(&value)?);
    }

    strip_user_info(req)?;
    scrub_query(req)?;

    let headers = req.headers_mut();
    if headers.contains_key(OPENAI_ORGANIZATION) {
        headers.insert(OPENAI_ORGANIZATION, HeaderValue::from_static(TEST_ORGANIZATION));
    }
    headers.remove(OPENAI_PROJECT);
    if headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(TEST_USER_AGENT));
    }
    if let Some(v) = header_str(req, GOOG_API_CLIENT) {
        let v = normalize_google_api_client_header(v);
        req.headers_mut()
            .insert(GOOG_API_CLIENT, HeaderValue::from_str(&v)?);
    }
    if let Some(v) = header_str(req, AMZ_USER_AGENT) {
        let v = normalize_version_header(v);
        req.headers_mut()
            .insert(AMZ_USER_AGENT, HeaderValue::from_str(&v)?);
    }
    if req.headers().contains_key(MS_CLIENT_REQUEST_ID) {
        req.headers_mut()
            .insert(MS_CLIENT_REQUEST_ID, HeaderValue::from_static(TEST_REQUEST_ID));
    }
    Ok(())
}

/// Drop `user:pass@` from the URL authority.
fn strip_user_info(req: &mut Request) -> anyhow::Result<()> {
    let Some(authority) = req.uri().authority().filter(|a| a.as_str().contains('@')) else {
        return Ok(());
    };
    let host = host_port(authority);
    let mut parts = req.uri().clone().into_parts();
    parts.authority = Some(host.parse().context("rebuild authority")?);
    *req.uri_mut() = Uri::from_parts(parts).context("rebuild URI")?;
    Ok(())
}

/// Mask secret query values and re-encode the query sorted by key.
fn scrub_query(req: &mut Request) -> anyhow::Result<()> {
    let Some(query) = req.uri().query() else {
        return Ok(());
    };

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        params.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    for (k, values) in params.iter_mut() {
        if is_secret_param(k) {
            *values = vec![TEST_API_KEY.to_string()];
        }
    }

    let mut enc = url::form_urlencoded::Serializer::new(String::new());
    for (k, values) in &params {
        for v in values {
            enc.append_pair(k, v);
        }
    }
    let encoded = enc.finish();

    let path = req.uri().path().to_string();
    let pq = if encoded.is_empty() {
        path
    } else {
        format!("{path}?{encoded}")
    };
    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(pq).context("re-encode query")?);
    *req.uri_mut() = Uri::from_parts(parts).context("rebuild URI")?;
    Ok(())
}

/// Drop tracing and session headers from a serialized response.
///
/// Buffers that do not parse as a response are left untouched.
pub fn default_response_scrubber(buf: &mut Vec<u8>) -> anyhow::Result<()> {
    let Ok(mut resp) = read_response(buf, &Method::GET) else {
        return Ok(());
    };
    let headers = resp.headers_mut();
    headers.remove(CF_RAY);
    headers.remove(SET_COOKIE);
    if headers.contains_key(OPENAI_ORGANIZATION) {
        headers.insert(OPENAI_ORGANIZATION, HeaderValue::from_static(TEST_ORGANIZATION));
    }
    *buf = write_response(&resp);
    Ok(())
}

/// Remove the port from the URL and `Host` header.
pub fn strip_port(req: &mut Request) -> anyhow::Result<()> {
    if let Some(authority) = req.uri().authority().filter(|a| a.port().is_some()) {
        let host = match authority.as_str().rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => authority.as_str().to_string(),
        };
        let mut parts = req.uri().clone().into_parts();
        parts.authority = Some(host.parse().context("rebuild authority")?);
        *req.uri_mut() = Uri::from_parts(parts).context("rebuild URI")?;
    }
    if let Some(host) = header_str(req, HOST.as_str()) {
        if let Some((name, port)) = host.rsplit_once(':') {
            if port.parse::<u16>().is_ok() {
                let value = HeaderValue::from_str(name)?;
                req.headers_mut().insert(HOST, value);
            }
        }
    }
    Ok(())
}

fn mask_version(version: &str) -> String {
    let len = version.len();
    match version.matches('.').count() {
        1 if len == 3 => "X.X".to_string(),
        1 => {
            let before = (len - 1) / 2;
            format!("{}.{}", "X".repeat(before), "X".repeat(len - 1 - before))
        }
        2 => match len {
            5 => "X.X.X".to_string(),
            6 => "X.XX.X".to_string(),
            7 => "X.XX.XX".to_string(),
            _ => {
                let seg = (len - 2) / 3;
                let rem = (len - 2) % 3;
                let a = seg + rem.min(1);
                let b = seg + rem.saturating_sub(1).min(1);
                format!("{}.{}.{}", "X".repeat(a), "X".repeat(b), "X".repeat(seg))
            }
        },
        _ => "X".repeat(len),
    }
}

/// Mask `/N.N.N` version segments with `X`, preserving the byte length.
///
/// `gl-go/1.24.4 gccl/v0.15.1` becomes `gl-go/X.XX.X gccl/vX.XX.X`.
pub fn normalize_google_api_client_header(header: &str) -> String {
    let out = GOOG_VERSION
        .replace_all(header, |caps: &Captures<'_>| {
            format!("{}{}", &caps[1], mask_version(&caps[2]))
        })
        .into_owned();
    debug_assert_eq!(out.len(), header.len());
    out
}

/// Replace go versions, dates and semver strings with fixed placeholders.
pub fn normalize_version_header(header: &str) -> String {
    let s = GO_VERSION.replace_all(header, "goX.X.X");
    let s = DOT_DATE.replace_all(&s, "XXXX.XX.XX");
    let s = DASH_DATE.replace_all(&s, "XXXX.XX.XX");
    let s = COMPACT_DATE.replace_all(&s, "XXXX.XX.XX");
    SEMVER.replace_all(&s, "X.X.X").into_owned()
}

/// Rewrite SDK version headers inside one stored request or response block,
/// the same way [`default_request_scrubber`] rewrites live requests. Brings
/// traces recorded by older SDK versions in line with current keys.
pub fn normalize_recorded_headers(block: &[u8]) -> Vec<u8> {
    let head_len = block
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or(block.len(), |i| i + 2);
    let (head, rest) = block.split_at(head_len);
    let Ok(head) = std::str::from_utf8(head) else {
        return block.to_vec();
    };

    let mut out = String::with_capacity(block.len());
    for line in head.split_inclusive('\n') {
        let (content, eol) = match line.strip_suffix("\r\n") {
            Some(c) => (c, "\r\n"),
            None => match line.strip_suffix('\n') {
                Some(c) => (c, "\n"),
                None => (line, ""),
            },
        };
        out.push_str(&normalize_header_line(content));
        out.push_str(eol);
    }
    let mut out = out.into_bytes();
    out.extend_from_slice(rest);
    out
}

fn normalize_header_line(line: &str) -> Cow<'_, str> {
    let Some((name, value)) = line.split_once(':') else {
        return Cow::Borrowed(line);
    };
    let value = value.trim_start();
    let normalized = if name.eq_ignore_ascii_case(GOOG_API_CLIENT) {
        normalize_google_api_client_header(value)
    } else if name.eq_ignore_ascii_case(AMZ_USER_AGENT) {
        normalize_version_header(value)
    } else if name.eq_ignore_ascii_case(USER_AGENT.as_str()) {
        GO_VERSION.replace_all(value, "goX.X.X").into_owned()
    } else {
        return Cow::Borrowed(line);
    };
    Cow::Owned(format!("{name}: {normalized}"))
}

/// Substrings that mark an embedding response.
const EMBEDDING_MARKERS: &[&str] = &[
    "batchEmbedContents",
    "models/embedding-",
    "\"object\": \"embedding\"",
    "\"object\":\"embedding\"",
];

/// [`embedding_json_formatter`] restricted to responses carrying an
/// embedding marker. Safe to register for every recording.
pub fn conditional_embedding_formatter() -> ResponseScrubber {
    let format = embedding_json_formatter();
    Arc::new(move |buf: &mut Vec<u8>| -> anyhow::Result<()> {
        let is_embedding = {
            let text = String::from_utf8_lossy(buf);
            EMBEDDING_MARKERS.iter().any(|m| text.contains(m))
        };
        if is_embedding {
            format(buf)
        } else {
            Ok(())
        }
    })
}

/// Response scrubber that re-indents JSON bodies and puts numeric arrays on
/// one line. Shrinks embedding traces considerably.
pub fn embedding_json_formatter() -> ResponseScrubber {
    Arc::new(|buf: &mut Vec<u8>| -> anyhow::Result<()> {
        let Ok(resp) = read_response(buf, &Method::GET) else {
            return Ok(());
        };
        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        if !is_json {
            return Ok(());
        }
        let (parts, body) = resp.into_parts();
        let formatted = format_json_body(&body);
        *buf = write_response(&Response::from_parts(parts, formatted.into()));
        Ok(())
    })
}

/// Re-indent a JSON document. Anything that does not parse is returned as is.
pub fn format_json_body(data: &[u8]) -> Vec<u8> {
    let trimmed = data.trim_ascii();
    if !matches!(trimmed.first(), Some(b'{' | b'[')) {
        return data.to_vec();
    }
    match serde_json::from_slice::<Value>(data) {
        Ok(v) => format_json_value(&v, 0).into_bytes(),
        Err(_) => data.to_vec(),
    }
}

fn format_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

fn format_json_value(v: &Value, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    let inner = "  ".repeat(indent + 1);
    match v {
        Value::Object(map) if map.is_empty() => "{}".to_string(),
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let fields: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| {
                    format!(
                        "{inner}{}: {}",
                        Value::String(k.clone()),
                        format_json_value(v, indent + 1)
                    )
                })
                .collect();
            format!("{{\n{}\n{pad}}}", fields.join(",\n"))
        }
        Value::Array(items) if items.is_empty() => "[]".to_string(),
        Value::Array(items) if items.iter().all(Value::is_number) => {
            let nums: Vec<String> = items
                .iter()
                .filter_map(Value::as_number)
                .map(format_number)
                .collect();
            format!("[{}]", nums.join(", "))
        }
        Value::Array(items) => {
            let lines: Vec<String> = items
                .iter()
                .map(|item| format!("{inner}{}", format_json_value(item, indent + 1)))
                .collect();
            format!("[\n{}\n{pad}]", lines.join(",\n"))
        }
        Value::Number(n) => format_number(n),
        other => other.to_string(),
    }
}
