//! Deterministic HTTP record/replay for offline, repeatable tests.
//!
//! A [`RecordReplay`] sits where a real HTTP transport would. When recording,
//! it forwards each request to the network and appends the exchange to a trace
//! file. When replaying, it answers from that file without any network access.
//! Requests are matched by their exact wire form after scrubbing, so the same
//! scrubbers that ran at record time must be registered for replay.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use httprr_core::{Config, RecordReplay, ReqwestTransport};
//!
//! # async fn example() -> httprr_core::HttprrResult<()> {
//! let config = Config::from_env()?;
//! let mut rr = RecordReplay::open("testdata/TestModels.httprr", ReqwestTransport::new()?, &config)?;
//! rr.scrub_req(httprr_core::scrub::strip_port);
//!
//! let rr = Arc::new(rr);
//! let resp = rr.client().get("https://api.example.com/v1/models").await?;
//! println!("{}", resp.status());
//! rr.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Trace format
//!
//! ```text
//! httprr trace v1\n
//! <n1> <n2>\n<n1 request bytes><n2 response bytes>
//! ```
//!
//! A trace may be stored gzip-compressed as `<name>.gz`; replay picks up the
//! compressed copy when the plain file is absent.
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `HTTPRR_RECORD` | Regex; matching trace files are re-recorded (default: replay all) |
//! | `HTTPRR_RECORD_DELAY_MS` | Pause after each recorded call (default: 0) |
//! | `HTTPRR_TESTDATA_DIR` | Directory for test traces (default: `testdata`) |
//! | `HTTPRR_CASSETTE_MODE` | Legacy JSON cassette mode: `replay`, `record`, `off` |

pub mod body;
pub mod cassette;
pub mod compress;
pub mod config;
pub mod error;
pub mod matcher;
pub mod record_replay;
pub mod scrub;
pub mod testing;
pub mod trace;
pub mod transport;
pub mod wire;

pub use body::Body;
pub use compress::{compress, decompress};
pub use config::Config;
pub use error::{ErrorKind, HttprrError, HttprrResult};
pub use record_replay::RecordReplay;
pub use scrub::ScrubPipeline;
pub use transport::{Client, NoNetwork, ReqwestTransport, Request, Response, Transport};
