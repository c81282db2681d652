//! Unpack a gzip tar backup into a temporary directory.

use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::debug;

use crate::filesystem::FileSystem;

const IMPLICIT_DIR_MODE: u32 = 0o755;

/// Decompress and unpack `reader` into a fresh temp dir and return its path.
/// A partially written dir is removed before an error is returned.
pub fn unzip_and_extract(reader: impl Read, fs: &dyn FileSystem) -> io::Result<PathBuf> {
    let dir = fs.temp_dir("kvault-restore-")?;
    match read_backup(GzDecoder::new(reader), fs, &dir) {
        Ok(()) => Ok(dir),
        Err(e) => {
            if let Err(rm) = fs.remove_all(&dir) {
                debug!(dir = %dir.display(), error = %rm, "removing partial extraction failed");
            }
            Err(e)
        }
    }
}

/// Unpack an uncompressed tar stream below `dir`.
pub fn read_backup(reader: impl Read, fs: &dyn FileSystem, dir: &Path) -> io::Result<()> {
    let mut archive = Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel = sanitize(&entry.path()?)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dir.join(&rel);
        let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;
        match entry.header().entry_type() {
            EntryType::Directory => fs.mkdir_all(&target, mode | 0o700)?,
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs.mkdir_all(parent, IMPLICIT_DIR_MODE)?;
                }
                let mut out = fs.create(&target, mode | 0o600)?;
                io::copy(&mut entry, &mut out)?;
                out.flush()?;
            }
            other => debug!(path = %rel.display(), kind = ?other, "skipping archive entry"),
        }
    }
    Ok(())
}

/// Reject absolute paths and parent traversal, dropping `.` segments.
fn sanitize(path: &Path) -> io::Result<PathBuf> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Normal(seg) => out.push(seg),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("archive entry {} escapes the extraction directory", path.display()),
                ));
            }
        }
    }
    Ok(out)
}
