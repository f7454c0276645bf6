//! The record/replay transport.
//!
//! A [`RecordReplay`] is bound to one trace file and decides once, when it is
//! opened, whether it records or replays:
//!
//! - **Recording** forwards each request to the real transport, then appends
//!   the scrubbed request key and response to the trace.
//! - **Replaying** answers from the table loaded at open time and never
//!   touches the network.
//!
//! A failed append is sticky: the trace is deleted and every later call, plus
//! [`RecordReplay::close`], reports the same error.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::compress::resolve_replay_path;
use crate::config::Config;
use crate::error::{HttprrError, HttprrResult};
use crate::matcher::{canonical_request, canonical_response};
use crate::scrub::ScrubPipeline;
use crate::trace::{read_trace, ReplayTable, TraceWriter};
use crate::transport::{Client, Request, Response, Transport};
use crate::wire::read_response;

struct RecordState {
    writer: Option<TraceWriter>,
    write_err: Option<Arc<io::Error>>,
}

enum Mode {
    Replay(ReplayTable),
    Record(Mutex<RecordState>),
}

pub struct RecordReplay {
    file: PathBuf,
    real: Arc<dyn Transport>,
    scrub: ScrubPipeline,
    record_delay: Duration,
    mode: Mode,
}

impl fmt::Debug for RecordReplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordReplay")
            .field("file", &self.file)
            .field("recording", &self.recording())
            .field("scrub", &self.scrub)
            .finish_non_exhaustive()
    }
}

impl RecordReplay {
    /// Record if `config` selects `file`, otherwise replay it.
    ///
    /// Replay reads `file`, or `file.gz` when only the compressed copy exists.
    pub fn open<T: Transport + 'static>(
        file: impl AsRef<Path>,
        transport: T,
        config: &Config,
    ) -> HttprrResult<Self> {
        let file = file.as_ref();
        if config.recording(file) {
            Ok(Self::create(file, transport)?.with_record_delay(config.record_delay()))
        } else {
            Self::load(resolve_replay_path(file), transport)
        }
    }

    /// Start a fresh recording, truncating any existing trace.
    pub fn create<T: Transport + 'static>(
        file: impl AsRef<Path>,
        transport: T,
    ) -> HttprrResult<Self> {
        let file = file.as_ref();
        let writer = TraceWriter::create(file)?;
        info!(path = %file.display(), "recording HTTP trace");
        Ok(Self::with_mode(
            file,
            Arc::new(transport),
            Mode::Record(Mutex::new(RecordState {
                writer: Some(writer),
                write_err: None,
            })),
        ))
    }

    /// Load an existing trace for replay.
    pub fn load<T: Transport + 'static>(file: impl AsRef<Path>, transport: T) -> HttprrResult<Self> {
        let file = file.as_ref();
        let table = read_trace(file)?;
        debug!(path = %file.display(), interactions = table.len(), "replaying HTTP trace");
        Ok(Self::with_mode(file, Arc::new(transport), Mode::Replay(table)))
    }

    fn with_mode(file: &Path, real: Arc<dyn Transport>, mode: Mode) -> Self {
        Self {
            file: file.to_path_buf(),
            real,
            scrub: ScrubPipeline::with_defaults(),
            record_delay: Duration::ZERO,
            mode,
        }
    }

    pub fn with_record_delay(mut self, delay: Duration) -> Self {
        self.record_delay = delay;
        self
    }

    /// Append a request scrubber. Replay must register the same scrubbers
    /// that were active when the trace was recorded.
    pub fn scrub_req<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Request) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.scrub.add_request(f);
        self
    }

    /// Append a response scrubber. Only affects what is written to the trace.
    pub fn scrub_resp<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Vec<u8>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.scrub.add_response(f);
        self
    }

    pub fn scrubbers(&self) -> &ScrubPipeline {
        &self.scrub
    }

    pub fn recording(&self) -> bool {
        matches!(self.mode, Mode::Record(_))
    }

    pub fn replaying(&self) -> bool {
        !self.recording()
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Client whose transport is this engine.
    pub fn client(self: &Arc<Self>) -> Client {
        Client::new(self.clone())
    }

    /// Finish the recording. Reports a previous write failure, if any.
    /// No-op when replaying or already closed.
    pub fn close(&self) -> HttprrResult<()> {
        let Mode::Record(state) = &self.mode else {
            return Ok(());
        };
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = &guard.write_err {
            return Err(self.storage_error(err.clone()));
        }
        if let Some(writer) = guard.writer.take() {
            writer
                .finish()
                .map_err(|e| HttprrError::io(&self.file, e))?;
            debug!(path = %self.file.display(), "closed HTTP trace");
        }
        Ok(())
    }

    fn storage_error(&self, source: Arc<io::Error>) -> HttprrError {
        HttprrError::Storage {
            path: self.file.clone(),
            source,
        }
    }

    fn replay(
        &self,
        table: &ReplayTable,
        scrubbed: &Request,
        key: &[u8],
        original: &Request,
    ) -> HttprrResult<Response> {
        let Some(stored) = table.get(key) else {
            debug!(method = %scrubbed.method(), url = %scrubbed.uri(), "no cached response");
            return Err(HttprrError::NoCachedResponse {
                method: scrubbed.method().to_string(),
                url: scrubbed.uri().to_string(),
                key: String::from_utf8_lossy(key).into_owned(),
            });
        };
        read_response(stored, original.method())
            .map_err(|detail| HttprrError::corrupt(&self.file, detail))
    }

    /// Fail fast if the trace can no longer be written.
    fn check_writable(&self, state: &Mutex<RecordState>) -> HttprrResult<()> {
        let guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = &guard.write_err {
            return Err(self.storage_error(err.clone()));
        }
        if guard.writer.is_none() {
            return Err(HttprrError::Closed {
                path: self.file.clone(),
            });
        }
        Ok(())
    }

    fn append(&self, state: &Mutex<RecordState>, key: &[u8], response: &[u8]) -> HttprrResult<()> {
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        if let Some(err) = &state.write_err {
            return Err(self.storage_error(err.clone()));
        }
        let Some(writer) = state.writer.as_mut() else {
            return Err(HttprrError::Closed {
                path: self.file.clone(),
            });
        };
        if let Err(e) = writer.append(key, response) {
            warn!(path = %self.file.display(), error = %e, "trace write failed, discarding recording");
            let err = Arc::new(e);
            state.write_err = Some(err.clone());
            if let Some(writer) = state.writer.take() {
                writer.discard();
            }
            return Err(self.storage_error(err));
        }
        Ok(())
    }

    async fn record(
        &self,
        state: &Mutex<RecordState>,
        req: Request,
        scrubbed: Request,
        key: Vec<u8>,
    ) -> HttprrResult<Response> {
        self.check_writable(state)?;

        let method = req.method().clone();
        let resp = self.real.round_trip(req).await?;
        if !self.record_delay.is_zero() {
            tokio::time::sleep(self.record_delay).await;
        }

        let (resp, stored) = canonical_response(&resp, &method, &self.scrub)?;
        self.append(state, &key, &stored)?;
        debug!(
            method = %scrubbed.method(),
            url = %scrubbed.uri(),
            status = resp.status().as_u16(),
            "recorded interaction"
        );
        Ok(resp)
    }
}

#[async_trait]
impl Transport for RecordReplay {
    async fn round_trip(&self, req: Request) -> HttprrResult<Response> {
        let (scrubbed, key) = canonical_request(&req, &self.scrub)?;
        match &self.mode {
            Mode::Replay(table) => self.replay(table, &scrubbed, &key, &req),
            Mode::Record(state) => self.record(state, req, scrubbed, key).await,
        }
    }
}
