//! Gzip storage tier for traces.
//!
//! A logical trace `foo.httprr` may live on disk as `foo.httprr` or
//! `foo.httprr.gz`, never both after a successful conversion. Conversions
//! write through a temp file in the target directory, so a failure leaves the
//! source untouched and no partial target behind.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{HttprrError, HttprrResult};

pub const GZ_SUFFIX: &str = ".gz";

pub fn is_compressed(path: &Path) -> bool {
    path.as_os_str()
        .to_string_lossy()
        .ends_with(GZ_SUFFIX)
}

/// `foo.httprr` -> `foo.httprr.gz`
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(GZ_SUFFIX);
    PathBuf::from(s)
}

/// `foo.httprr.gz` -> `foo.httprr`
pub fn decompressed_path(path: &Path) -> HttprrResult<PathBuf> {
    path.to_str()
        .and_then(|s| s.strip_suffix(GZ_SUFFIX))
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| HttprrError::InvalidPath {
            path: path.to_path_buf(),
            reason: format!("expected a {GZ_SUFFIX} file"),
        })
}

/// Path replay should read: the plain file if present, else its `.gz`
/// sibling, else `path` itself so the read error names the logical file.
pub fn resolve_replay_path(path: &Path) -> PathBuf {
    if is_compressed(path) || path.exists() {
        return path.to_path_buf();
    }
    let gz = compressed_path(path);
    if gz.exists() {
        debug!(path = %gz.display(), "replaying compressed trace");
        return gz;
    }
    path.to_path_buf()
}

fn temp_in(dir: &Path, path: &Path) -> HttprrResult<NamedTempFile> {
    NamedTempFile::new_in(dir).map_err(|e| HttprrError::io(path, e))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Persist `tmp` as `target` and remove `source`. If the source cannot be
/// removed the new target is removed too, so only one copy remains.
fn replace(tmp: NamedTempFile, target: &Path, source: &Path) -> HttprrResult<()> {
    tmp.persist(target)
        .map_err(|e| HttprrError::io(target, e.error))?;
    if let Err(e) = std::fs::remove_file(source) {
        if let Err(cleanup) = std::fs::remove_file(target) {
            warn!(path = %target.display(), error = %cleanup, "failed to remove converted copy");
        }
        return Err(HttprrError::io(source, e));
    }
    Ok(())
}

fn write_gzip(out: &mut File, data: &[u8]) -> io::Result<()> {
    // mtime 0 keeps the output stable across runs
    let mut gz = GzBuilder::new()
        .mtime(0)
        .write(out, Compression::default());
    gz.write_all(data)?;
    gz.finish()?;
    Ok(())
}

/// Replace the contents of `path` through a temp file, gzipping when `path`
/// ends in `.gz`.
pub fn overwrite(path: &Path, data: &[u8]) -> HttprrResult<()> {
    let mut tmp = temp_in(parent_dir(path), path)?;
    let written = if is_compressed(path) {
        write_gzip(tmp.as_file_mut(), data)
    } else {
        tmp.write_all(data)
    };
    written.map_err(|e| HttprrError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| HttprrError::io(path, e.error))?;
    Ok(())
}

/// Gzip `path` to `path.gz` and remove the plain file.
pub fn compress(path: &Path) -> HttprrResult<PathBuf> {
    if is_compressed(path) {
        return Err(HttprrError::InvalidPath {
            path: path.to_path_buf(),
            reason: "already compressed".to_string(),
        });
    }
    let data = std::fs::read(path).map_err(|e| HttprrError::io(path, e))?;
    let target = compressed_path(path);

    let mut tmp = temp_in(parent_dir(path), &target)?;
    write_gzip(tmp.as_file_mut(), &data).map_err(|e| HttprrError::io(&target, e))?;

    replace(tmp, &target, path)?;
    debug!(from = %path.display(), to = %target.display(), bytes = data.len(), "compressed trace");
    Ok(target)
}

/// Gunzip `path.gz` to `path` and remove the compressed file.
pub fn decompress(path: &Path) -> HttprrResult<PathBuf> {
    let target = decompressed_path(path)?;
    let raw = std::fs::read(path).map_err(|e| HttprrError::io(path, e))?;
    let mut data = Vec::new();
    GzDecoder::new(raw.as_slice())
        .read_to_end(&mut data)
        .map_err(|e| HttprrError::corrupt(path, format!("gzip: {e}")))?;

    let mut tmp = temp_in(parent_dir(path), &target)?;
    tmp.write_all(&data).map_err(|e| HttprrError::io(&target, e))?;

    replace(tmp, &target, path)?;
    debug!(from = %path.display(), to = %target.display(), bytes = data.len(), "decompressed trace");
    Ok(target)
}
