//! Archive pipeline: tar+gzip ⇄ AES-256-GCM.
//!
//! # 作成 (create_encrypted_archive)
//! ```text
//! [encoder thread] tar -> gzip -> PipeWriter ==pipe==> PipeReader -> buffer -> seal -> file
//! ```
//! 非圧縮の tar ストリームはディスクにもメモリにも丸ごと載らない。
//! ただし AEAD は単一バッファを seal するので、圧縮後のサイズ分はメモリに載る。
//!
//! # 復号 (decrypt_archive)
//! ```text
//! file -> open (認証 + 復号) -> [feeder thread] PipeWriter ==pipe==> gunzip -> untar -> dest
//! ```

mod pipe;

pub use self::pipe::{PipeReader, PipeWriter, pipe};

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;
use tracing::debug;

use crate::crypto::{self, CryptoError};

/// Chunks buffered between the two sides of the pipe.
const PIPE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("source directory {0} has no entries")]
    EmptySource(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Archives are create-only; an existing file is never replaced.
    #[error("archive {0} already exists")]
    AlreadyExists(PathBuf),

    #[error(transparent)]
    Crypto(CryptoError),

    /// Wrong passphrase, or the archive was corrupted or tampered with.
    #[error("archive authentication failed: wrong passphrase or corrupted file")]
    Authentication,

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

impl ArchiveError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<CryptoError> for ArchiveError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => ArchiveError::Authentication,
            other => ArchiveError::Crypto(other),
        }
    }
}

/// Tar, gzip and encrypt `source_dir` into `archive_path`.
///
/// The archive is written to a sibling temp file and linked into place only
/// when complete. An existing file at `archive_path` is never touched.
pub fn create_encrypted_archive(
    source_dir: &Path,
    archive_path: &Path,
    passphrase: &str,
) -> Result<PathBuf, ArchiveError> {
    if fs::symlink_metadata(archive_path).is_ok() {
        return Err(ArchiveError::AlreadyExists(archive_path.to_path_buf()));
    }

    let mut entries = fs::read_dir(source_dir)
        .map_err(|e| ArchiveError::io(format!("failed to read {}", source_dir.display()), e))?;
    if entries.next().is_none() {
        return Err(ArchiveError::EmptySource(source_dir.to_path_buf()));
    }

    let compressed = encode(source_dir)?;
    debug!(compressed_bytes = compressed.len(), "encoded stream complete");
    let sealed = crypto::seal(&compressed, passphrase)?;
    drop(compressed);

    write_new(archive_path, &sealed)?;
    Ok(archive_path.to_path_buf())
}

/// Run the tar+gzip encoder on its own thread and collect its output.
fn encode(source_dir: &Path) -> Result<Vec<u8>, ArchiveError> {
    let (writer, mut reader) = pipe(PIPE_DEPTH);
    let root = source_dir.to_path_buf();
    let encoder = thread::Builder::new()
        .name("coffer-tar".into())
        .spawn(move || encode_tar_gz(&root, writer))
        .map_err(|e| ArchiveError::io("failed to spawn encoder thread", e))?;

    let mut compressed = Vec::new();
    let read = reader.read_to_end(&mut compressed);
    // unblocks the encoder if we stopped reading early
    drop(reader);

    // the encoder's own result decides whether the stream is complete
    encoder
        .join()
        .map_err(|_| ArchiveError::ThreadPanicked("encoder"))?
        .map_err(|e| ArchiveError::io("tar+gzip encoding failed", e))?;
    read.map_err(|e| ArchiveError::io("failed to read encoded stream", e))?;
    Ok(compressed)
}

/// Write `bytes` to a temp file next to `path`, then link it to `path`
/// without replacing anything. The temp file is removed on every error.
fn write_new(path: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let write_err = |e| ArchiveError::io(format!("failed to write {}", path.display()), e);

    let mut partial = tempfile::Builder::new()
        .prefix(".archive_")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(write_err)?;
    partial
        .write_all(bytes)
        .and_then(|()| partial.as_file().sync_all())
        .map_err(write_err)?;

    partial.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            ArchiveError::AlreadyExists(path.to_path_buf())
        } else {
            write_err(e.error)
        }
    })?;
    Ok(())
}

fn encode_tar_gz(root: &Path, writer: PipeWriter) -> io::Result<()> {
    let gz = GzEncoder::new(writer, Compression::default());
    let mut builder = tar::Builder::new(gz);
    builder.append_dir_all(".", root)?;
    let gz = builder.into_inner()?;
    gz.finish()?;
    Ok(())
}

/// Authenticate, decrypt and extract `archive_path` into `dest_dir`.
pub fn decrypt_archive(
    archive_path: &Path,
    passphrase: &str,
    dest_dir: &Path,
) -> Result<(), ArchiveError> {
    let sealed = fs::read(archive_path)
        .map_err(|e| ArchiveError::io(format!("failed to read {}", archive_path.display()), e))?;
    // nothing is extracted unless the whole archive authenticates
    let plaintext = crypto::open(&sealed, passphrase)?;
    drop(sealed);

    fs::create_dir_all(dest_dir)
        .map_err(|e| ArchiveError::io(format!("failed to create {}", dest_dir.display()), e))?;

    let (mut writer, reader) = pipe(PIPE_DEPTH);
    let feeder = thread::Builder::new()
        .name("coffer-untar".into())
        .spawn(move || writer.write_all(&plaintext))
        .map_err(|e| ArchiveError::io("failed to spawn decoder feed thread", e))?;

    let unpacked = tar::Archive::new(GzDecoder::new(reader)).unpack(dest_dir);

    match feeder.join() {
        Err(_) => return Err(ArchiveError::ThreadPanicked("decoder feed")),
        // the extractor may stop before the gzip trailer; that is not an error
        Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => {
            return Err(ArchiveError::io("failed to feed decoder", e));
        }
        Ok(_) => {}
    }
    unpacked.map_err(|e| {
        ArchiveError::io(format!("failed to extract into {}", dest_dir.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("attachments/abc")).unwrap();
        fs::write(dir.join("db.sqlite3"), b"SQLite format 3\0....").unwrap();
        fs::write(dir.join("attachments/abc/file one.bin"), vec![42u8; 10_000]).unwrap();
        fs::write(dir.join("empty"), b"").unwrap();
    }

    #[test]
    fn archive_round_trips_directory() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        populate(&src);
        let archive = tmp.path().join("a.tar.gz.enc");

        let out = create_encrypted_archive(&src, &archive, "pw").unwrap();
        assert_eq!(out, archive);

        let dest = tmp.path().join("restored");
        decrypt_archive(&archive, "pw", &dest).unwrap();

        assert_eq!(
            fs::read(dest.join("attachments/abc/file one.bin")).unwrap(),
            vec![42u8; 10_000]
        );
        assert_eq!(fs::read(dest.join("empty")).unwrap(), b"");
        assert_eq!(
            fs::read(dest.join("db.sqlite3")).unwrap(),
            b"SQLite format 3\0...."
        );
    }

    #[test]
    fn empty_source_is_rejected_without_output() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let archive = tmp.path().join("a.tar.gz.enc");

        let err = create_encrypted_archive(&src, &archive, "pw").unwrap_err();
        assert!(matches!(err, ArchiveError::EmptySource(_)));
        assert!(!archive.exists());
    }

    #[test]
    fn missing_source_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = create_encrypted_archive(
            &tmp.path().join("nope"),
            &tmp.path().join("a.tar.gz.enc"),
            "pw",
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }

    #[test]
    fn unwritable_destination_leaves_no_archive() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        populate(&src);
        let archive = tmp.path().join("missing-dir/a.tar.gz.enc");

        let err = create_encrypted_archive(&src, &archive, "pw").unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
        assert!(!archive.exists());
    }

    #[test]
    fn wrong_passphrase_extracts_nothing() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        populate(&src);
        let archive = tmp.path().join("a.tar.gz.enc");
        create_encrypted_archive(&src, &archive, "pw").unwrap();

        let dest = tmp.path().join("restored");
        let err = decrypt_archive(&archive, "not-pw", &dest).unwrap_err();
        assert!(matches!(err, ArchiveError::Authentication));
        assert!(!dest.exists());
    }

    #[test]
    fn corrupted_archive_is_authentication_error() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        populate(&src);
        let archive = tmp.path().join("a.tar.gz.enc");
        create_encrypted_archive(&src, &archive, "pw").unwrap();

        let mut bytes = fs::read(&archive).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        fs::write(&archive, &bytes).unwrap();

        let err = decrypt_archive(&archive, "pw", &tmp.path().join("restored")).unwrap_err();
        assert!(matches!(err, ArchiveError::Authentication));
    }

    #[test]
    fn existing_archive_is_never_replaced() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        populate(&src);
        let archive = tmp.path().join("vault_20240101_000000.tar.gz.enc");
        fs::write(&archive, b"previous good backup").unwrap();

        let err = create_encrypted_archive(&src, &archive, "pw").unwrap_err();

        assert!(matches!(err, ArchiveError::AlreadyExists(_)));
        assert_eq!(fs::read(&archive).unwrap(), b"previous good backup");
    }

    #[cfg(unix)]
    #[test]
    fn failed_encoding_leaves_existing_and_partial_files_alone() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        populate(&src);
        std::os::unix::fs::symlink(tmp.path().join("gone"), src.join("dangling")).unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let previous = out.join("vault_20240101_000000.tar.gz.enc");
        fs::write(&previous, b"previous good backup").unwrap();

        let archive = out.join("vault_20240101_000001.tar.gz.enc");
        let err = create_encrypted_archive(&src, &archive, "pw").unwrap_err();

        assert!(matches!(err, ArchiveError::Io { .. }));
        assert!(!archive.exists());
        assert_eq!(fs::read(&previous).unwrap(), b"previous good backup");
        // nothing but the earlier archive remains
        assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
    }
}
