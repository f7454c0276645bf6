//! `normalize`: mask version strings in request headers of recorded traces,
//! so traces recorded with different SDK or Go releases stay byte-stable.

use httprr_core::trace::normalize_file;
use tracing::info;

use super::super::args::NormalizeArgs;
use super::{collect, is_trace};
use crate::exit_codes;

pub fn run(args: NormalizeArgs) -> anyhow::Result<i32> {
    let mut failed = 0usize;
    let mut changed = 0usize;

    for path in collect(&args.target.dir, true, is_trace)? {
        match normalize_file(&path, args.dry_run) {
            Ok(false) => {}
            Ok(true) if args.dry_run => {
                println!("would update {}", path.display());
                changed += 1;
            }
            Ok(true) => {
                info!(path = %path.display(), "normalized trace");
                println!("updated {}", path.display());
                changed += 1;
            }
            Err(e) => {
                eprintln!("error: {}: {e}", path.display());
                failed += 1;
            }
        }
    }

    let verb = if args.dry_run { "would update" } else { "updated" };
    eprintln!("normalize: {verb} {changed} file(s)");
    Ok(if failed == 0 {
        exit_codes::SUCCESS
    } else {
        exit_codes::FILES_FAILED
    })
}
