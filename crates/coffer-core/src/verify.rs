//! Integrity verifier.
//!
//! An archive is only accepted after it has been decrypted into a scratch
//! directory and the scratch directory hashes to the same fingerprint as the
//! directory it was built from.

use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error};

use crate::archive::{self, ArchiveError};

/// SHA-256 over the sorted `(relative path, contents)` pairs of a directory.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(
        "integrity check failed: archive fingerprint {actual} does not match source {expected}"
    )]
    Mismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },

    #[error("round-trip decryption failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("failed to fingerprint {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Hash every regular file under `root`.
///
/// Directories only contribute through the paths of the files they contain,
/// so an empty directory does not change the fingerprint. Paths use `/` and
/// are sorted, so the result does not depend on enumeration order.
pub fn fingerprint_dir(root: &Path) -> io::Result<Fingerprint> {
    let mut files = Vec::new();
    collect_files(root, PathBuf::new(), Vec::new(), &mut files)?;
    files.sort_by(|a, b| a.key.cmp(&b.key));

    let mut hasher = Sha256::new();
    for file in &files {
        let path = root.join(&file.rel);
        let len = fs::metadata(&path)?.len();
        hasher.update((file.key.len() as u64).to_be_bytes());
        hasher.update(&file.key);
        hasher.update(len.to_be_bytes());
        io::copy(&mut File::open(&path)?, &mut hasher)?;
    }
    Ok(Fingerprint(hasher.finalize().into()))
}

struct FileEntry {
    rel: PathBuf,
    /// Raw `/`-joined name bytes; the hash and sort key.
    key: Vec<u8>,
}

fn collect_files(
    root: &Path,
    rel: PathBuf,
    key: Vec<u8>,
    out: &mut Vec<FileEntry>,
) -> io::Result<()> {
    for entry in fs::read_dir(root.join(&rel))? {
        let entry = entry?;
        let name = entry.file_name();
        let child_rel = rel.join(&name);
        let mut child_key = key.clone();
        if !child_key.is_empty() {
            child_key.push(b'/');
        }
        child_key.extend(name_bytes(&name));

        // follows symlinks, as the tar encoder does
        let meta = fs::metadata(entry.path())?;
        if meta.is_dir() {
            collect_files(root, child_rel, child_key, out)?;
        } else if meta.is_file() {
            out.push(FileEntry {
                rel: child_rel,
                key: child_key,
            });
        }
    }
    Ok(())
}

#[cfg(unix)]
fn name_bytes(name: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes().to_vec()
}

#[cfg(windows)]
fn name_bytes(name: &OsStr) -> Vec<u8> {
    use std::os::windows::ffi::OsStrExt;
    name.encode_wide().flat_map(u16::to_be_bytes).collect()
}

#[cfg(not(any(unix, windows)))]
fn name_bytes(name: &OsStr) -> Vec<u8> {
    name.to_string_lossy().into_owned().into_bytes()
}

/// Decrypt `archive` into a scratch directory under `scratch_parent` and
/// compare it with `source_dir`.
///
/// On any failure the archive is deleted, so an unverified backup never stays
/// in the archive directory. The scratch directory is always removed.
pub fn verify_archive(
    archive: &Path,
    passphrase: &str,
    source_dir: &Path,
    scratch_parent: &Path,
) -> Result<Fingerprint, VerifyError> {
    let outcome = round_trip(archive, passphrase, source_dir, scratch_parent);
    if let Err(err) = &outcome {
        error!(
            file = %archive.display(),
            error = %err,
            "archive failed verification, deleting"
        );
        if let Err(e) = fs::remove_file(archive) {
            error!(file = %archive.display(), error = %e, "failed to delete unverified archive");
        }
    }
    outcome
}

fn round_trip(
    archive: &Path,
    passphrase: &str,
    source_dir: &Path,
    scratch_parent: &Path,
) -> Result<Fingerprint, VerifyError> {
    let scratch = tempfile::Builder::new()
        .prefix(".verify_")
        .tempdir_in(scratch_parent)
        .map_err(|source| VerifyError::Io {
            path: scratch_parent.to_path_buf(),
            source,
        })?;

    archive::decrypt_archive(archive, passphrase, scratch.path())?;

    let expected = fingerprint_dir(source_dir).map_err(|source| VerifyError::Io {
        path: source_dir.to_path_buf(),
        source,
    })?;
    let actual = fingerprint_dir(scratch.path()).map_err(|source| VerifyError::Io {
        path: scratch.path().to_path_buf(),
        source,
    })?;
    debug!(%expected, %actual, "fingerprints computed");

    if expected != actual {
        return Err(VerifyError::Mismatch { expected, actual });
    }
    Ok(expected)
}
