//! Error types for record/replay.

use std::path::PathBuf;
use std::sync::Arc;

/// Boxed error from an underlying transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Record/replay errors.
#[derive(Debug, thiserror::Error)]
pub enum HttprrError {
    /// The record pattern is not a valid regular expression.
    #[error("invalid record pattern {pattern:?}: {source}")]
    InvalidRecordPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// File does not start with the trace header line.
    #[error("read {}: not an httprr trace", path.display())]
    NotATrace { path: PathBuf },

    /// Length prefix malformed or out of range, or a stored response that cannot be parsed.
    #[error("read {}: corrupt httprr trace: {detail}", path.display())]
    CorruptTrace { path: PathBuf, detail: String },

    /// Replay lookup miss. Never falls through to the network.
    #[error(
        "cached HTTP response not found for {method} {url}\n\n{key}\n\n\
         Hint: re-run with HTTPRR_RECORD=<pattern> to record new HTTP interactions"
    )]
    NoCachedResponse {
        method: String,
        url: String,
        key: String,
    },

    /// A registered scrubber failed.
    #[error("scrub failed: {0}")]
    Scrub(#[source] anyhow::Error),

    /// Request cannot be built or serialized.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Response cannot be serialized or re-parsed.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Appending to the trace failed. Sticky for the rest of the session.
    #[error("write {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Real transport failure, passed through untouched.
    #[error("{0}")]
    Transport(#[source] BoxError),

    /// Recording without a real transport.
    #[error("httprr: no transport configured")]
    NoTransport,

    /// Recording after `close()`.
    #[error("httprr: {} is closed", path.display())]
    Closed { path: PathBuf },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Legacy JSON cassette could not be read or written.
    #[error("cassette {}: {message}", path.display())]
    Cassette { path: PathBuf, message: String },
}

/// Coarse classification so callers can branch on kind rather than message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    /// Request could not be built or serialized (bad URL, no host).
    Request,
    Format,
    Miss,
    Scrub,
    Storage,
    Transport,
    Io,
}

impl HttprrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRecordPattern { .. } => ErrorKind::Config,

            Self::NotATrace { .. } | Self::CorruptTrace { .. } | Self::Cassette { .. } => {
                ErrorKind::Format
            }

            Self::NoCachedResponse { .. } => ErrorKind::Miss,

            Self::Scrub(_) => ErrorKind::Scrub,

            Self::InvalidRequest { .. } => ErrorKind::Request,

            Self::Storage { .. } | Self::Closed { .. } => ErrorKind::Storage,

            // InvalidResponse: a live response that failed to re-parse
            Self::Transport(_) | Self::NoTransport | Self::InvalidResponse { .. } => {
                ErrorKind::Transport
            }

            Self::Io { .. } | Self::InvalidPath { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::CorruptTrace {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for HttprrError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

/// Result type for record/replay operations.
pub type HttprrResult<T> = Result<T, HttprrError>;
