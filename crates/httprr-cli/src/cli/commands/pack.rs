//! `pack` and `unpack`: gzip traces in place and back.

use std::path::{Path, PathBuf};

use httprr_core::{compress, decompress, HttprrResult};
use tracing::{error, info};

use super::super::args::WalkArgs;
use super::{collect, is_packed_trace, is_plain_trace};
use crate::exit_codes;

pub fn run_pack(args: WalkArgs) -> anyhow::Result<i32> {
    convert(&args, is_plain_trace, compress, "compressed")
}

pub fn run_unpack(args: WalkArgs) -> anyhow::Result<i32> {
    convert(&args, is_packed_trace, decompress, "decompressed")
}

fn convert(
    args: &WalkArgs,
    keep: fn(&Path) -> bool,
    op: fn(&Path) -> HttprrResult<PathBuf>,
    verb: &str,
) -> anyhow::Result<i32> {
    let files = collect(&args.dir, args.recursive, keep)?;
    let mut failed = 0usize;
    for file in &files {
        match op(file) {
            Ok(target) => info!(from = %file.display(), to = %target.display(), "{verb}"),
            Err(e) => {
                error!(file = %file.display(), error = %e, "conversion failed");
                eprintln!("error: {e}");
                failed += 1;
            }
        }
    }

    eprintln!(
        "{verb} {} of {} trace file(s)",
        files.len() - failed,
        files.len()
    );
    Ok(if failed == 0 {
        exit_codes::SUCCESS
    } else {
        exit_codes::FILES_FAILED
    })
}
