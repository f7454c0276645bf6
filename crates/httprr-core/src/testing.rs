//! Helpers for tests that record against live services.
//!
//! A test named `TestChat/streaming` records to
//! `testdata/TestChat-streaming.httprr` and replays from that file (or its
//! `.gz` copy) on every later run.
//!
//! ```no_run
//! use httprr_core::testing::{open_for_test, skip_reason};
//! use httprr_core::{Config, ReqwestTransport};
//!
//! # async fn demo() -> httprr_core::HttprrResult<()> {
//! let config = Config::from_env()?;
//! if let Some(reason) = skip_reason(&config, "TestChat", &["OPENAI_API_KEY"]) {
//!     eprintln!("skipping: {reason}");
//!     return Ok(());
//! }
//! let rr = std::sync::Arc::new(open_for_test("TestChat", ReqwestTransport::new()?, &config)?);
//! let _models = rr.client().get("https://api.openai.com/v1/models").await?;
//! rr.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::compress::compressed_path;
use crate::config::{Config, RECORD_ENV};
use crate::error::{HttprrError, HttprrResult};
use crate::record_replay::RecordReplay;
use crate::scrub::{conditional_embedding_formatter, embedding_json_formatter};
use crate::transport::Transport;

pub const TRACE_EXTENSION: &str = "httprr";

lazy_static! {
    static ref HYPHEN_RUN: Regex = Regex::new("-+").unwrap();
}

/// File-system safe name for a test identifier.
pub fn clean_file_name(test_name: &str) -> String {
    let replaced: String = test_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '-',
            c => c,
        })
        .collect();
    HYPHEN_RUN
        .replace_all(&replaced, "-")
        .trim_matches('-')
        .to_string()
}

/// `<testdata>/<clean name>.httprr`
pub fn trace_path(config: &Config, test_name: &str) -> PathBuf {
    config
        .testdata_dir()
        .join(format!("{}.{TRACE_EXTENSION}", clean_file_name(test_name)))
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Plain file, `.gz` copy, or the newer of the two when both exist.
fn best_replay_file(path: &Path) -> PathBuf {
    let gz = compressed_path(path);
    match (modified(path), modified(&gz)) {
        (Some(plain), Some(packed)) => {
            let pick = if plain > packed { path.to_path_buf() } else { gz };
            warn!(path = %pick.display(), "found both plain and compressed traces, using the newer one");
            pick
        }
        (None, Some(_)) => gz,
        _ => path.to_path_buf(),
    }
}

fn remove_stale(path: &Path) {
    for p in [path.to_path_buf(), compressed_path(path)] {
        match std::fs::remove_file(&p) {
            Ok(()) => debug!(path = %p.display(), "removed stale trace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %p.display(), error = %e, "failed to remove stale trace"),
        }
    }
}

/// Open the trace for `test_name` under the configured test data directory.
///
/// Recording removes any existing plain or compressed trace first so exactly
/// one copy remains afterwards.
pub fn open_for_test<T: Transport + 'static>(
    test_name: &str,
    transport: T,
    config: &Config,
) -> HttprrResult<RecordReplay> {
    let dir = config.testdata_dir();
    std::fs::create_dir_all(dir).map_err(|e| HttprrError::io(dir, e))?;

    let path = trace_path(config, test_name);
    if config.recording(&path) {
        remove_stale(&path);
        let mut rr = RecordReplay::open(&path, transport, config)?;
        // embedding responses are reformatted when they are written
        let format = conditional_embedding_formatter();
        rr.scrub_resp(move |buf: &mut Vec<u8>| format(buf));
        Ok(rr)
    } else {
        RecordReplay::load(best_replay_file(&path), transport)
    }
}

/// [`open_for_test`] with [`embedding_json_formatter`] registered for every
/// response, not only the ones that look like embeddings.
pub fn open_for_embedding_test<T: Transport + 'static>(
    test_name: &str,
    transport: T,
    config: &Config,
) -> HttprrResult<RecordReplay> {
    let mut rr = open_for_test(test_name, transport, config)?;
    let format = embedding_json_formatter();
    rr.scrub_resp(move |buf: &mut Vec<u8>| format(buf));
    Ok(rr)
}

pub fn has_existing_recording(config: &Config, test_name: &str) -> bool {
    let path = trace_path(config, test_name);
    path.exists() || compressed_path(&path).exists()
}

/// True when any of `env_vars` is set to a non-empty value.
pub fn has_required_credentials(env_vars: &[&str]) -> bool {
    env_vars
        .iter()
        .any(|v| std::env::var(v).is_ok_and(|s| !s.is_empty()))
}

/// Why a test cannot run: no recording to replay and no credentials to record with.
pub fn skip_reason(config: &Config, test_name: &str, env_vars: &[&str]) -> Option<String> {
    if has_existing_recording(config, test_name) || has_required_credentials(env_vars) {
        return None;
    }
    let hint = format!(
        "no httprr recording available. Hint: re-run with {RECORD_ENV}=<pattern> to record new HTTP interactions"
    );
    let missing: Vec<&str> = env_vars
        .iter()
        .copied()
        .filter(|v| std::env::var(v).map_or(true, |s| s.is_empty()))
        .collect();
    if missing.is_empty() {
        Some(hint)
    } else {
        Some(format!("{} not set and {hint}", missing.join(",")))
    }
}
