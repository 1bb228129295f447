//! Content-addressed on-disk store of normalized, binary-encoded
//! expressions, keyed by SHA-256. Shared across sessions and processes:
//! present files are authoritative (and re-verified on every read), and
//! writes go through a temp file plus atomic rename so a racing reader
//! never observes a partial artifact.

use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tarn_syntax::{Expr, Hash};
use tracing::{debug, warn};

use crate::error::{Error, ImportError};
use crate::phase::binary::{decode, ProtocolVersion};

pub(crate) enum CacheProbe {
    /// The artifact exists; read and verify it.
    Hit(PathBuf),
    /// The slot where a freshly resolved artifact may be persisted.
    Miss(PathBuf),
}

/// Locate the on-disk slot for `hash`, creating the cache directory tree
/// with owner-only permissions on the way. `None` means the cache is
/// unavailable (no home, or a directory we cannot make private) and the
/// caller falls through to uncached resolution.
pub(crate) fn probe(hash: &Hash) -> Option<CacheProbe> {
    let root = cache_root()?;
    if let Err(e) = ensure_private_dir(&root) {
        warn!(dir = %root.display(), error = %e, "integrity cache unavailable");
        return None;
    }
    let Hash::SHA256(bytes) = hash;
    let file = root.join(hex::encode(bytes));
    Some(if file.exists() {
        CacheProbe::Hit(file)
    } else {
        CacheProbe::Miss(file)
    })
}

fn cache_root() -> Option<PathBuf> {
    let dirs = directories::BaseDirs::new()?;
    Some(dirs.cache_dir().join("tarn"))
}

// Walks down from the filesystem root: pre-existing directories must be
// owner-accessible, missing ones are created 0700.
fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        return assert_owner_accessible(dir);
    }
    if let Some(parent) = dir.parent() {
        ensure_private_dir(parent)?;
    }
    match create_private_dir(dir) {
        Ok(()) => Ok(()),
        // lost a race against another writer; their directory must do
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            assert_owner_accessible(dir)
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir(dir)
}

#[cfg(unix)]
fn assert_owner_accessible(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(dir)?;
    if !meta.is_dir() {
        return Err(io::Error::other(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    if meta.permissions().mode() & 0o700 != 0o700 {
        return Err(io::Error::other(format!(
            "{} is not owner-accessible",
            dir.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn assert_owner_accessible(dir: &Path) -> io::Result<()> {
    let meta = fs::metadata(dir)?;
    if !meta.is_dir() {
        return Err(io::Error::other(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(())
}

/// Read a cached artifact: re-hash the raw bytes against the digest the
/// import demanded, then decode.
pub(crate) fn read_checked(
    version: ProtocolVersion,
    path: &Path,
    expected: &Hash,
) -> Result<Expr, Error> {
    let bytes = fs::read(path)?;
    let Hash::SHA256(want) = expected;
    let actual = Sha256::digest(&bytes);
    if actual.as_slice() != want.as_slice() {
        return Err(ImportError::HashMismatch {
            expected: hex::encode(want),
            actual: hex::encode(actual),
        }
        .into());
    }
    debug!(path = %path.display(), "integrity cache hit");
    Ok(decode(version, &bytes)?)
}

/// Persist already-verified canonical bytes; the temp file inherits
/// owner-only permissions and lands under its final name in one rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("cache file has no parent"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "persisted to the integrity cache");
    Ok(())
}
