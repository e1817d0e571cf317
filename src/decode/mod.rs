//! Decoder contract consumed by the extractor.
//!
//! The container format itself is decoded elsewhere; this module only fixes the shape
//! the rest of the crate relies on: open an archive, walk its entries in order, write or
//! read the current entry's bytes, and report which volume files were consumed.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

#[cfg(feature = "unrar")]
pub mod rar;

/// Default upper bound on the dictionary a decoder may allocate (1 GiB).
pub const DEFAULT_MAX_DICTIONARY_BYTES: u64 = 1 << 30;

/// Buffer size used when entry bytes are pumped through [`EntryStream::open_entry`].
pub const COPY_BUFFER_BYTES: usize = 256 * 1024;

/// Options handed to the decoder for one open session.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtractionSettings {
    pub max_dictionary_bytes: u64,
    pub password: Option<String>,
    pub allow_symlinks: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_dictionary_bytes: DEFAULT_MAX_DICTIONARY_BYTES,
            password: None,
            allow_symlinks: false,
        }
    }
}

impl ExtractionSettings {
    /// Copy of these settings that carries `password`.
    #[must_use]
    pub fn with_password(&self, password: &str) -> Self {
        Self {
            password: Some(password.to_owned()),
            ..self.clone()
        }
    }
}

impl fmt::Debug for ExtractionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionSettings")
            .field("max_dictionary_bytes", &self.max_dictionary_bytes)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("allow_symlinks", &self.allow_symlinks)
            .finish()
    }
}

/// Kind of object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Header of the entry the stream is positioned on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Name exactly as recorded in the archive; untrusted.
    pub name: String,
    pub kind: EntryKind,
    /// Unix permission bits, when the archive recorded them.
    pub mode: Option<u32>,
    pub modified: Option<SystemTime>,
}

/// Entry summary returned by [`ArchiveDecoder::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: String,
    pub is_dir: bool,
    pub encrypted: bool,
}

/// Failures reported by a decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("archive is encrypted and no password was supplied")]
    PasswordRequired,
    #[error("incorrect password")]
    BadPassword,
    #[error("archive dictionary exceeds the {limit} byte limit")]
    DictionaryTooLarge { limit: u64 },
    #[error("archive data is corrupt: {0}")]
    Corrupt(String),
    #[error("unsupported archive feature: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Whether retrying with a different password could succeed.
    #[must_use]
    pub fn is_password_error(&self) -> bool {
        matches!(self, Self::PasswordRequired | Self::BadPassword)
    }

    /// Recover a decoder error that travelled through an `io::Error`, as happens when
    /// entry data is read through [`std::io::Read`].
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<DecodeError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(decode) = inner.downcast::<DecodeError>() {
                    return *decode;
                }
            }
            return Self::Corrupt("decoder error lost while unwrapping".into());
        }
        Self::Io(err)
    }
}

/// One open decode session over an archive.
pub trait EntryStream {
    /// Advance to the next entry; `Ok(None)` marks the end of the archive.
    fn next_entry(&mut self) -> Result<Option<EntryHeader>, DecodeError>;

    /// Reader over the current entry's bytes.
    ///
    /// Used for small entries such as symlink targets; file data goes through
    /// [`extract_entry`](Self::extract_entry).
    fn open_entry(&mut self) -> Result<Box<dyn Read + '_>, DecodeError>;

    /// Decode the current entry into a new file at `target`, replacing any regular file
    /// already there. The caller has checked `target` and owns cleanup on error.
    ///
    /// The default pumps [`open_entry`](Self::open_entry) through a fixed buffer, so
    /// memory use does not grow with the entry size.
    fn extract_entry(&mut self, target: &Path) -> Result<(), DecodeError> {
        let mut reader = self.open_entry()?;
        let mut file = File::create(target).map_err(|err| write_error(target, err))?;
        let mut buffer = vec![0_u8; COPY_BUFFER_BYTES];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => return Ok(()),
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(DecodeError::from_io(err)),
            };
            file.write_all(&buffer[..read])
                .map_err(|err| write_error(target, err))?;
        }
    }

    /// Volume files consumed so far, in order.
    fn volumes(&self) -> Vec<PathBuf>;
}

fn write_error(target: &Path, err: io::Error) -> DecodeError {
    DecodeError::Io(io::Error::new(
        err.kind(),
        format!("failed to write {}: {err}", target.display()),
    ))
}

/// Factory for decode sessions.
pub trait ArchiveDecoder {
    /// Open `path` for sequential extraction.
    fn open<'a>(
        &'a self,
        path: &Path,
        settings: &ExtractionSettings,
    ) -> Result<Box<dyn EntryStream + 'a>, DecodeError>;

    /// List every entry without extracting data.
    fn list(
        &self,
        path: &Path,
        settings: &ExtractionSettings,
    ) -> Result<Vec<ListedEntry>, DecodeError>;
}

impl<D: ArchiveDecoder + ?Sized> ArchiveDecoder for &D {
    fn open<'a>(
        &'a self,
        path: &Path,
        settings: &ExtractionSettings,
    ) -> Result<Box<dyn EntryStream + 'a>, DecodeError> {
        (**self).open(path, settings)
    }

    fn list(
        &self,
        path: &Path,
        settings: &ExtractionSettings,
    ) -> Result<Vec<ListedEntry>, DecodeError> {
        (**self).list(path, settings)
    }
}
