//! Canonical request keys and stored response bytes.

use http::Method;
use tracing::trace;

use crate::error::{HttprrError, HttprrResult};
use crate::scrub::ScrubPipeline;
use crate::transport::{Request, Response};
use crate::wire::{read_response, write_request, write_response};

/// Copy of `req` that scrubbers may freely rewrite. The body is duplicated,
/// so the original stays readable for the real send.
pub fn scrub_clone(req: &Request) -> Request {
    let mut out = http::Request::new(req.body().as_ref().map(|b| b.duplicate()));
    *out.method_mut() = req.method().clone();
    *out.uri_mut() = req.uri().clone();
    *out.version_mut() = req.version();
    *out.headers_mut() = req.headers().clone();
    out
}

/// Scrubbed clone of `req` together with its wire form.
pub fn canonical_request(req: &Request, scrub: &ScrubPipeline) -> HttprrResult<(Request, Vec<u8>)> {
    let mut clone = scrub_clone(req);
    scrub.scrub_request(&mut clone)?;
    let key = write_request(&clone)?;
    trace!(key = %String::from_utf8_lossy(&key), "canonical request");
    Ok((clone, key))
}

/// Scrubbed wire form of `req`: the trace key and the stored request block.
pub fn request_key(req: &Request, scrub: &ScrubPipeline) -> HttprrResult<Vec<u8>> {
    canonical_request(req, scrub).map(|(_, key)| key)
}

/// Serialize `resp`, hand back the reparsed response for the caller and the
/// scrubbed bytes for storage.
pub fn canonical_response(
    resp: &Response,
    method: &Method,
    scrub: &ScrubPipeline,
) -> HttprrResult<(Response, Vec<u8>)> {
    let mut wire = write_response(resp);
    let reparsed =
        read_response(&wire, method).map_err(|message| HttprrError::InvalidResponse { message })?;
    scrub.scrub_response(&mut wire)?;
    Ok((reparsed, wire))
}
