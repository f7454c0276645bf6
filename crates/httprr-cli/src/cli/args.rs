use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "rrtool",
    version,
    about = "Compress, decompress and tidy httprr trace files"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Gzip every `*.httprr` trace into `*.httprr.gz`
    Pack(WalkArgs),
    /// Expand every `*.httprr.gz` trace back into `*.httprr`
    Unpack(WalkArgs),
    /// Fail when any trace under the directory is stored uncompressed
    Check(DirArgs),
    /// Where both copies of a trace exist, remove the older one
    Clean(CleanArgs),
    /// Mask SDK and Go versions in request headers of existing traces
    Normalize(NormalizeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct WalkArgs {
    /// Directory to scan
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Descend into subdirectories
    #[arg(short = 'r', long)]
    pub recursive: bool,
}

/// Scans the whole tree under `dir`.
#[derive(Args, Debug, Clone)]
pub struct DirArgs {
    /// Directory to scan
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    #[command(flatten)]
    pub target: DirArgs,

    /// Print what would be removed without touching anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct NormalizeArgs {
    #[command(flatten)]
    pub target: DirArgs,

    /// List traces that would change without rewriting them
    #[arg(long)]
    pub dry_run: bool,
}
