use std::path::{Path, PathBuf};

use anyhow::Context;
use walkdir::WalkDir;

use super::args::{Cli, Command};

pub mod check;
pub mod clean;
pub mod normalize;
pub mod pack;

const PLAIN_SUFFIX: &str = ".httprr";
const PACKED_SUFFIX: &str = ".httprr.gz";

pub fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Pack(args) => pack::run_pack(args),
        Command::Unpack(args) => pack::run_unpack(args),
        Command::Check(args) => check::run(args),
        Command::Clean(args) => clean::run(args),
        Command::Normalize(args) => normalize::run(args),
    }
}

pub(crate) fn is_plain_trace(path: &Path) -> bool {
    path.to_str().is_some_and(|s| s.ends_with(PLAIN_SUFFIX))
}

pub(crate) fn is_packed_trace(path: &Path) -> bool {
    path.to_str().is_some_and(|s| s.ends_with(PACKED_SUFFIX))
}

pub(crate) fn is_trace(path: &Path) -> bool {
    is_plain_trace(path) || is_packed_trace(path)
}

/// Files under `dir` accepted by `keep`, in a stable order. Only the top
/// level is scanned unless `recursive`.
pub(crate) fn collect(
    dir: &Path,
    recursive: bool,
    keep: fn(&Path) -> bool,
) -> anyhow::Result<Vec<PathBuf>> {
    let depth = if recursive { usize::MAX } else { 1 };
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).max_depth(depth).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to scan {}", dir.display()))?;
        if entry.file_type().is_file() && keep(entry.path()) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}
