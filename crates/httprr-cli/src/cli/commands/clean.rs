//! `clean`: resolve traces stored both plain and compressed.

use std::path::Path;
use std::time::SystemTime;

use anyhow::Context;
use httprr_core::compress::compressed_path;
use tracing::info;

use super::super::args::CleanArgs;
use super::{collect, is_plain_trace};
use crate::exit_codes;

fn modified(path: &Path) -> anyhow::Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("failed to stat {}", path.display()))
}

pub fn run(args: CleanArgs) -> anyhow::Result<i32> {
    let mut failed = 0usize;
    let mut removed = 0usize;

    for plain in collect(&args.target.dir, true, is_plain_trace)? {
        let packed = compressed_path(&plain);
        if !packed.is_file() {
            continue;
        }
        // the compressed copy goes unless it is strictly newer
        let older = match (modified(&plain), modified(&packed)) {
            (Ok(p), Ok(g)) if g > p => plain,
            (Ok(_), Ok(_)) => packed,
            (Err(e), _) | (_, Err(e)) => {
                eprintln!("error: {e:#}");
                failed += 1;
                continue;
            }
        };

        if args.dry_run {
            println!("would remove {}", older.display());
            continue;
        }
        match std::fs::remove_file(&older) {
            Ok(()) => {
                info!(path = %older.display(), "removed older trace copy");
                println!("removed {}", older.display());
                removed += 1;
            }
            Err(e) => {
                eprintln!("error: failed to remove {}: {e}", older.display());
                failed += 1;
            }
        }
    }

    if !args.dry_run {
        eprintln!("clean: removed {removed} file(s)");
    }
    Ok(if failed == 0 {
        exit_codes::SUCCESS
    } else {
        exit_codes::FILES_FAILED
    })
}
