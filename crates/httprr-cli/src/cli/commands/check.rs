//! `check`: CI gate against committing uncompressed traces.

use super::super::args::DirArgs;
use super::{collect, is_plain_trace};
use crate::exit_codes;

/// Always walks the whole tree: traces live in nested `testdata` directories.
pub fn run(args: DirArgs) -> anyhow::Result<i32> {
    let plain = collect(&args.dir, true, is_plain_trace)?;
    if plain.is_empty() {
        eprintln!("check: OK, no uncompressed traces in {}", args.dir.display());
        return Ok(exit_codes::SUCCESS);
    }
    for p in &plain {
        println!("{}", p.display());
    }
    eprintln!(
        "check: {} uncompressed trace file(s); run `rrtool pack` to fix",
        plain.len()
    );
    Ok(exit_codes::FILES_FAILED)
}
