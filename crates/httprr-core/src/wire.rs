//! HTTP/1.1 wire serialization for trace keys and stored responses.
//!
//! Requests are written in proxy form (`GET http://host/path HTTP/1.1`) so the
//! scheme is part of the key. Headers are written sorted by canonical name so
//! the same logical request always produces the same bytes.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::uri::Authority;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};

use crate::error::{HttprrError, HttprrResult};
use crate::transport::{Request, Response};

/// `content-type` -> `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

fn sorted_headers<'a>(
    headers: &'a HeaderMap,
    skip: &[HeaderName],
) -> Vec<(String, &'a HeaderValue)> {
    let mut out: Vec<_> = headers
        .iter()
        .filter(|(name, _)| !skip.contains(name))
        .map(|(name, value)| (canonical_header_name(name.as_str()), value))
        .collect();
    // stable: repeated headers keep insertion order
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

fn write_header(buf: &mut Vec<u8>, name: &str, value: &[u8]) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value);
    buf.extend_from_slice(b"\r\n");
}

/// `host[:port]` without any `user:pass@` prefix.
pub(crate) fn host_port(authority: &Authority) -> String {
    match authority.port_u16() {
        Some(port) => format!("{}:{port}", authority.host()),
        None => authority.host().to_string(),
    }
}

/// Serialize a request in proxy form. User info in the URL is never written.
pub fn write_request(req: &Request) -> HttprrResult<Vec<u8>> {
    let uri = req.uri();
    let host_header = req.headers().get(HOST).map(HeaderValue::as_bytes);

    let authority = match (uri.authority(), host_header) {
        (Some(a), _) => host_port(a).into_bytes(),
        (None, Some(h)) if !h.is_empty() => h.to_vec(),
        _ => {
            return Err(HttprrError::InvalidRequest {
                message: format!("{} {uri}: no Host or URL set", req.method()),
            })
        }
    };
    let scheme = uri.scheme_str().unwrap_or("http");
    let path = match uri.path_and_query().map(|p| p.as_str()) {
        Some(p) if !p.is_empty() => p,
        _ => "/",
    };

    let mut buf = Vec::new();
    buf.extend_from_slice(req.method().as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(scheme.as_bytes());
    buf.extend_from_slice(b"://");
    buf.extend_from_slice(&authority);
    buf.extend_from_slice(path.as_bytes());
    buf.extend_from_slice(b" HTTP/1.1\r\n");

    write_header(&mut buf, "Host", host_header.unwrap_or(authority.as_slice()));
    if let Some(body) = req.body() {
        write_header(&mut buf, "Content-Length", body.len().to_string().as_bytes());
    }
    for (name, value) in sorted_headers(req.headers(), &[HOST, CONTENT_LENGTH, TRANSFER_ENCODING]) {
        write_header(&mut buf, &name, value.as_bytes());
    }
    buf.extend_from_slice(b"\r\n");
    if let Some(body) = req.body() {
        buf.extend_from_slice(body.as_bytes());
    }
    Ok(buf)
}

/// Serialize a response with an explicit `Content-Length`.
pub fn write_response(resp: &Response) -> Vec<u8> {
    let status = resp.status();
    let reason = status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("status code {}", status.as_u16()));

    let mut buf = Vec::new();
    buf.extend_from_slice(format!("{:?} {} {reason}\r\n", resp.version(), status.as_u16()).as_bytes());
    write_header(
        &mut buf,
        "Content-Length",
        resp.body().len().to_string().as_bytes(),
    );
    for (name, value) in sorted_headers(resp.headers(), &[CONTENT_LENGTH, TRANSFER_ENCODING]) {
        write_header(&mut buf, &name, value.as_bytes());
    }
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(resp.body());
    buf
}

fn next_line<'a>(rest: &mut &'a [u8]) -> Option<&'a [u8]> {
    let end = rest.iter().position(|&b| b == b'\n')?;
    let line = &rest[..end];
    *rest = &rest[end + 1..];
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

fn trim(b: &[u8]) -> &[u8] {
    let start = b.iter().position(|c| !c.is_ascii_whitespace()).unwrap_or(b.len());
    let end = b
        .iter()
        .rposition(|c| !c.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &b[start..end]
}

fn parse_version(proto: &str) -> Result<Version, String> {
    match proto {
        "HTTP/0.9" => Ok(Version::HTTP_09),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/2" | "HTTP/2.0" => Ok(Version::HTTP_2),
        "HTTP/3" | "HTTP/3.0" => Ok(Version::HTTP_3),
        _ => Err(format!("malformed HTTP version {proto:?}")),
    }
}

fn body_forbidden(method: &Method, status: StatusCode) -> bool {
    *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Parse a serialized response as it would be read back for `method`.
///
/// Errors are plain messages; callers attach the trace path.
pub fn read_response(data: &[u8], method: &Method) -> Result<Response, String> {
    let mut rest = data;

    let line = next_line(&mut rest).ok_or("missing status line")?;
    let line = std::str::from_utf8(line).map_err(|_| "status line is not UTF-8".to_string())?;
    let mut parts = line.splitn(3, ' ');
    let version = parse_version(parts.next().unwrap_or_default())?;
    let status = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| format!("malformed status line {line:?}"))?;

    let mut headers = HeaderMap::new();
    loop {
        let line = next_line(&mut rest).ok_or("unexpected end of headers")?;
        if line.is_empty() {
            break;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| format!("malformed header line {:?}", String::from_utf8_lossy(line)))?;
        let name = HeaderName::from_bytes(trim(&line[..colon])).map_err(|e| e.to_string())?;
        let value = HeaderValue::from_bytes(trim(&line[colon + 1..])).map_err(|e| e.to_string())?;
        headers.append(name, value);
    }

    let body: &[u8] = if body_forbidden(method, status) {
        &[]
    } else if let Some(len) = headers.get(CONTENT_LENGTH) {
        let len = len
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| format!("bad Content-Length {len:?}"))?;
        if len > rest.len() {
            return Err(format!(
                "unexpected EOF: Content-Length {len}, {} bytes available",
                rest.len()
            ));
        }
        &rest[..len]
    } else {
        rest
    };

    let mut resp = Response::new(Bytes::copy_from_slice(body));
    *resp.status_mut() = status;
    *resp.version_mut() = version;
    *resp.headers_mut() = headers;
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::transport::build_request;

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x-goog-api-client"), "X-Goog-Api-Client");
        assert_eq!(canonical_header_name("SECRET"), "Secret");
    }

    #[test]
    fn request_is_written_in_proxy_form_with_sorted_headers() {
        let mut req = build_request(
            Method::POST,
            "https://api.example.com/v1/x?b=2&a=1",
            Some(Body::new("hello")),
        )
        .unwrap();
        req.headers_mut().insert("zeta", HeaderValue::from_static("z"));
        req.headers_mut().insert("accept", HeaderValue::from_static("*/*"));

        let wire = String::from_utf8(write_request(&req).unwrap()).unwrap();
        assert_eq!(
            wire,
            "POST https://api.example.com/v1/x?b=2&a=1 HTTP/1.1\r\n\
             Host: api.example.com\r\n\
             Content-Length: 5\r\n\
             Accept: */*\r\n\
             Zeta: z\r\n\
             \r\n\
             hello"
        );
    }

    #[test]
    fn request_key_is_stable() {
        let req = build_request(Method::GET, "http://h/x", None).unwrap();
        assert_eq!(write_request(&req).unwrap(), write_request(&req).unwrap());
    }

    #[test]
    fn user_info_never_reaches_the_key() {
        let req = build_request(Method::GET, "http://user:s3cret@h:8080/x", None).unwrap();
        let key = String::from_utf8(write_request(&req).unwrap()).unwrap();
        assert_eq!(key, "GET http://h:8080/x HTTP/1.1\r\nHost: h:8080\r\n\r\n");

        let req = build_request(Method::GET, "https://user@[::1]/x", None).unwrap();
        let key = String::from_utf8(write_request(&req).unwrap()).unwrap();
        assert!(key.starts_with("GET https://[::1]/x HTTP/1.1\r\nHost: [::1]\r\n"));
    }

    #[test]
    fn request_without_host_fails() {
        let req = build_request(Method::GET, "/relative", None).unwrap();
        let err = write_request(&req).unwrap_err();
        assert!(err.to_string().contains("no Host or URL set"));
    }

    #[test]
    fn response_round_trips_through_parser() {
        let mut resp = Response::new(Bytes::from_static(b"{\"ok\":true}"));
        *resp.status_mut() = StatusCode::CREATED;
        resp.headers_mut()
            .insert("content-type", HeaderValue::from_static("application/json"));

        let wire = write_response(&resp);
        assert!(wire.starts_with(b"HTTP/1.1 201 Created\r\nContent-Length: 11\r\n"));

        let back = read_response(&wire, &Method::GET).unwrap();
        assert_eq!(back.status(), StatusCode::CREATED);
        assert_eq!(back.body().as_ref(), b"{\"ok\":true}");
        assert_eq!(back.headers()["content-type"], "application/json");
    }

    #[test]
    fn unknown_status_gets_generic_reason() {
        let mut resp = Response::new(Bytes::new());
        *resp.status_mut() = StatusCode::from_u16(555).unwrap();
        let wire = write_response(&resp);
        assert!(wire.starts_with(b"HTTP/1.1 555 status code 555\r\n"));
    }

    #[test]
    fn head_and_not_modified_have_empty_bodies() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nbody";
        let resp = read_response(wire, &Method::HEAD).unwrap();
        assert!(resp.body().is_empty());

        let wire = b"HTTP/1.1 304 Not Modified\r\nContent-Length: 4\r\n\r\nbody";
        let resp = read_response(wire, &Method::GET).unwrap();
        assert!(resp.body().is_empty());
    }

    #[test]
    fn missing_content_length_reads_to_end() {
        let resp = read_response(b"HTTP/1.0 200 OK\n\nrest of it", &Method::GET).unwrap();
        assert_eq!(resp.version(), Version::HTTP_10);
        assert_eq!(resp.body().as_ref(), b"rest of it");
    }

    #[test]
    fn malformed_responses_are_rejected() {
        let err = read_response(b"HZZP/1.1 200 OK\r\n\r\n", &Method::GET).unwrap_err();
        assert!(err.contains("malformed HTTP version"));

        let err = read_response(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort", &Method::GET)
            .unwrap_err();
        assert!(err.contains("unexpected EOF"));

        assert!(read_response(b"HTTP/1.1 200 OK\r\nNo-Terminator: x\r\n", &Method::GET).is_err());
        assert!(read_response(b"", &Method::GET).is_err());
    }
}
