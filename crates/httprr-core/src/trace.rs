//! On-disk trace format.
//!
//! ```text
//! httprr trace v1\n
//! <n1> <n2>\n<n1 request bytes><n2 response bytes>
//! ...
//! ```
//!
//! Lengths are ASCII decimal. Nothing separates the request block from the
//! response block except the declared counts.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::compress::{is_compressed, overwrite};
use crate::error::{HttprrError, HttprrResult};
use crate::scrub::normalize_recorded_headers;

pub const TRACE_HEADER: &str = "httprr trace v1\n";

/// Canonical request bytes to stored response bytes.
pub type ReplayTable = HashMap<Vec<u8>, Vec<u8>>;

/// One stored exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

fn split_line(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let end = data.iter().position(|&b| b == b'\n')?;
    let line = &data[..end];
    Some((line.strip_suffix(b"\r").unwrap_or(line), &data[end + 1..]))
}

fn parse_lengths(line: &[u8]) -> Option<(usize, usize)> {
    let line = std::str::from_utf8(line).ok()?;
    let (a, b) = line.split_once(' ')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|c| c.is_ascii_digit());
    if !digits(a) || !digits(b) {
        return None;
    }
    Some((a.parse().ok()?, b.parse().ok()?))
}

/// Parse every interaction in file order.
pub fn parse_interactions(path: &Path, data: &[u8]) -> HttprrResult<Vec<Interaction>> {
    let mut rest = match split_line(data) {
        Some((b"httprr trace v1", rest)) => rest,
        _ => {
            return Err(HttprrError::NotATrace {
                path: path.to_path_buf(),
            })
        }
    };

    let mut out = Vec::new();
    while !rest.is_empty() {
        let (line, tail) = split_line(rest)
            .ok_or_else(|| HttprrError::corrupt(path, "truncated length line"))?;
        let (n1, n2) = parse_lengths(line).ok_or_else(|| {
            HttprrError::corrupt(
                path,
                format!("bad length line {:?}", String::from_utf8_lossy(line)),
            )
        })?;
        let total = n1
            .checked_add(n2)
            .filter(|&t| t <= tail.len())
            .ok_or_else(|| {
                HttprrError::corrupt(
                    path,
                    format!("record of {n1}+{n2} bytes, {} bytes left", tail.len()),
                )
            })?;
        out.push(Interaction {
            request: tail[..n1].to_vec(),
            response: tail[n1..total].to_vec(),
        });
        rest = &tail[total..];
    }
    Ok(out)
}

/// Parse a trace into a lookup table. A repeated key keeps its last response.
pub fn parse_trace(path: &Path, data: &[u8]) -> HttprrResult<ReplayTable> {
    let interactions = parse_interactions(path, data)?;
    let count = interactions.len();
    let table: ReplayTable = interactions
        .into_iter()
        .map(|i| (i.request, i.response))
        .collect();
    if table.len() < count {
        debug!(path = %path.display(), duplicates = count - table.len(), "trace has repeated keys");
    }
    Ok(table)
}

/// Read the raw bytes of a trace, gunzipping `.gz` files.
pub fn read_trace_bytes(path: &Path) -> HttprrResult<Vec<u8>> {
    let raw = std::fs::read(path).map_err(|e| HttprrError::io(path, e))?;
    if !is_compressed(path) {
        return Ok(raw);
    }
    let mut data = Vec::new();
    GzDecoder::new(raw.as_slice())
        .read_to_end(&mut data)
        .map_err(|e| HttprrError::corrupt(path, format!("gzip: {e}")))?;
    Ok(data)
}

pub fn read_trace(path: &Path) -> HttprrResult<ReplayTable> {
    let data = read_trace_bytes(path)?;
    parse_trace(path, &data)
}

/// Trace with SDK version headers normalized in every block, or `None` when
/// nothing would change.
pub fn normalize_trace(path: &Path, data: &[u8]) -> HttprrResult<Option<Vec<u8>>> {
    let mut out = TRACE_HEADER.as_bytes().to_vec();
    for i in parse_interactions(path, data)? {
        out.extend(encode_interaction(
            &normalize_recorded_headers(&i.request),
            &normalize_recorded_headers(&i.response),
        ));
    }
    Ok((out != data).then_some(out))
}

/// Normalize a trace file in place, plain or `.gz`. Returns whether it
/// changed (or would change, with `dry_run`).
pub fn normalize_file(path: &Path, dry_run: bool) -> HttprrResult<bool> {
    let data = read_trace_bytes(path)?;
    let Some(out) = normalize_trace(path, &data)? else {
        return Ok(false);
    };
    if !dry_run {
        overwrite(path, &out)?;
        debug!(path = %path.display(), "normalized trace headers");
    }
    Ok(true)
}

/// `"<n1> <n2>\n"` followed by both blocks.
pub fn encode_interaction(request: &[u8], response: &[u8]) -> Vec<u8> {
    let mut buf = format!("{} {}\n", request.len(), response.len()).into_bytes();
    buf.reserve(request.len() + response.len());
    buf.extend_from_slice(request);
    buf.extend_from_slice(response);
    buf
}

/// Append-only handle on a trace being recorded.
#[derive(Debug)]
pub struct TraceWriter {
    path: PathBuf,
    file: File,
}

impl TraceWriter {
    /// Truncate or create `path` and write the header.
    pub fn create(path: &Path) -> HttprrResult<Self> {
        let mut file = File::create(path).map_err(|e| HttprrError::io(path, e))?;
        file.write_all(TRACE_HEADER.as_bytes())
            .map_err(|e| HttprrError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one record with a single `write_all`.
    pub fn append(&mut self, request: &[u8], response: &[u8]) -> io::Result<()> {
        self.file.write_all(&encode_interaction(request, response))
    }

    pub fn finish(mut self) -> io::Result<()> {
        self.file.flush()
    }

    /// Close and delete the trace so a partial recording never looks valid.
    pub fn discard(self) {
        let Self { path, file } = self;
        drop(file);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove broken trace");
            }
        }
    }

    /// Swap the handle for a read-only one so the next append fails.
    #[cfg(test)]
    pub(crate) fn break_for_test(&mut self) -> io::Result<()> {
        self.file = File::open(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn trace(records: &[(&str, &str)]) -> Vec<u8> {
        let mut data = TRACE_HEADER.as_bytes().to_vec();
        for (req, resp) in records {
            data.extend(encode_interaction(req.as_bytes(), resp.as_bytes()));
        }
        data
    }

    #[test]
    fn parses_records_in_order() {
        let data = trace(&[("GET a", "resp a"), ("GET b", "resp b")]);
        let got = parse_interactions(Path::new("t"), &data).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].request, b"GET b");
        assert_eq!(got[1].response, b"resp b");
    }

    #[test]
    fn header_only_is_empty_trace() {
        let table = parse_trace(Path::new("t"), TRACE_HEADER.as_bytes()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn last_definition_wins() {
        let data = trace(&[("K", "first"), ("K", "second")]);
        let table = parse_trace(Path::new("t"), &data).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[b"K".as_slice()], b"second");
    }

    #[test]
    fn crlf_lines_are_accepted() {
        let data = b"httprr trace v1\r\n1 2\r\nabc";
        let got = parse_interactions(Path::new("t"), data).unwrap();
        assert_eq!(got[0].request, b"a");
        assert_eq!(got[0].response, b"bc");
    }

    #[test]
    fn wrong_header_is_not_a_trace() {
        for data in [&b""[..], b"httprr trace v2\n", b"httprr trace v1"] {
            let err = parse_trace(Path::new("t"), data).unwrap_err();
            assert!(err.to_string().contains("not an httprr trace"), "{err}");
        }
    }

    #[test]
    fn malformed_lengths_are_corrupt() {
        let cases: [&[u8]; 6] = [
            b"httprr trace v1\ngarbage\n",
            b"httprr trace v1\n1 2",
            b"httprr trace v1\n5 5\nshort",
            b"httprr trace v1\n-1 2\nabc",
            b"httprr trace v1\n1  2\nabc",
            b"httprr trace v1\n18446744073709551615 2\nabc",
        ];
        for data in cases {
            let err = parse_trace(Path::new("t"), data).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format);
            assert!(err.to_string().contains("corrupt httprr trace"), "{err}");
        }
    }

    #[test]
    fn writer_output_parses_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rr.httprr");

        let mut w = TraceWriter::create(&path).unwrap();
        w.append(b"req-1", b"resp-1").unwrap();
        w.append(b"req-2", b"").unwrap();
        w.finish().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw, &b"httprr trace v1\n5 6\nreq-1resp-1\n5 0\nreq-2"[..]);

        let table = read_trace(&path).unwrap();
        assert_eq!(table[b"req-2".as_slice()], b"");
    }

    #[test]
    fn discard_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rr.httprr");
        let mut w = TraceWriter::create(&path).unwrap();
        w.break_for_test().unwrap();
        assert!(w.append(b"a", b"b").is_err());
        w.discard();
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = read_trace(&dir.path().join("nope.httprr")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn normalize_rewrites_version_headers_and_lengths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rr.httprr");
        let req = "GET http://h/x HTTP/1.1\r\nHost: h\r\nUser-Agent: sdk go1.22.3\r\n\r\n";
        let resp = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        std::fs::write(&path, trace(&[(req, resp)])).unwrap();

        assert!(normalize_file(&path, true).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), trace(&[(req, resp)]));

        assert!(normalize_file(&path, false).unwrap());
        let table = read_trace(&path).unwrap();
        let want = req.replace("go1.22.3", "goX.X.X");
        assert_eq!(table[want.as_bytes()], resp.as_bytes());

        // already normalized
        assert!(!normalize_file(&path, false).unwrap());
    }

    #[test]
    fn normalize_keeps_gzip_traces_compressed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rr.httprr");
        let req = "GET http://h/x HTTP/1.1\r\nHost: h\r\nX-Goog-Api-Client: gl-go/1.21.0\r\n\r\n";
        std::fs::write(&path, trace(&[(req, "HTTP/1.1 204 No Content\r\n\r\n")])).unwrap();
        let gz = crate::compress::compress(&path).unwrap();

        assert!(normalize_file(&gz, false).unwrap());
        let raw = std::fs::read(&gz).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);
        let data = read_trace_bytes(&gz).unwrap();
        let text = String::from_utf8(data).unwrap();
        assert!(text.contains("X-Goog-Api-Client: gl-go/X.XX.X\r\n"), "{text}");
    }
}
