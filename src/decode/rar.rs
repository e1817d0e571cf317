//! [`ArchiveDecoder`] backed by the UnRAR library through the `unrar` crate.

use std::io::{self, Cursor as ByteCursor, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use time::{Date, Month, PrimitiveDateTime, Time};
use unrar::error::{Code, UnrarError};
use unrar::{Archive, CursorBeforeFile, CursorBeforeHeader, OpenArchive, Process};

use self::headers::{HeaderFacts, HostOs, Layout};
use super::{
    ArchiveDecoder, DecodeError, EntryHeader, EntryKind, EntryStream, ExtractionSettings,
    ListedEntry,
};
use crate::policy::MAX_SYMLINK_TARGET_BYTES;

mod headers;

const S_IFMT: u32 = 0o170_000;
const S_IFREG: u32 = 0o100_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFLNK: u32 = 0o120_000;
const OWNER_READ: u32 = 0o400;

/// Decoder that delegates to the bundled UnRAR sources.
///
/// Each session first lists the headers to learn host systems, dictionary sizes and
/// redirection targets, then walks the archive a second time to extract.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnrarDecoder;

impl UnrarDecoder {
    fn archive<'a>(path: &'a Path, settings: &'a ExtractionSettings) -> Archive<'a> {
        match &settings.password {
            Some(password) => Archive::with_password(path, password),
            None => Archive::new(path),
        }
    }
}

impl ArchiveDecoder for UnrarDecoder {
    fn open<'a>(
        &'a self,
        path: &Path,
        settings: &ExtractionSettings,
    ) -> Result<Box<dyn EntryStream + 'a>, DecodeError> {
        let layout = headers::read_layout(path, settings.password.as_deref())?;
        check_dictionaries(path, &layout, settings.max_dictionary_bytes)?;

        let handle = Self::archive(path, settings)
            .open_for_processing()
            .map_err(map_unrar_error)?;
        Ok(Box::new(UnrarStream {
            first_volume: path.to_path_buf(),
            layout,
            cursor: Some(Cursor::Header(handle)),
            position: 0,
            current: None,
        }))
    }

    fn list(
        &self,
        path: &Path,
        settings: &ExtractionSettings,
    ) -> Result<Vec<ListedEntry>, DecodeError> {
        let listing = Self::archive(path, settings)
            .open_for_listing()
            .map_err(map_unrar_error)?;
        let mut entries = Vec::new();
        for header in listing {
            let header = header.map_err(map_unrar_error)?;
            entries.push(ListedEntry {
                name: header.filename.to_string_lossy().into_owned(),
                is_dir: header.is_directory(),
                encrypted: header.is_encrypted(),
            });
        }
        Ok(entries)
    }
}

enum Cursor {
    Header(OpenArchive<Process, CursorBeforeHeader>),
    File(OpenArchive<Process, CursorBeforeFile>),
    Finished,
}

/// What the stream remembers about the entry it is positioned on.
struct Current {
    encrypted: bool,
    unpacked_size: u64,
    link_target: Option<String>,
}

struct UnrarStream {
    first_volume: PathBuf,
    layout: Layout,
    // `None` only after an error consumed the handle.
    cursor: Option<Cursor>,
    position: usize,
    current: Option<Current>,
}

impl UnrarStream {
    fn take_file(&mut self) -> Result<OpenArchive<Process, CursorBeforeFile>, DecodeError> {
        match self.cursor.take() {
            Some(Cursor::File(handle)) => Ok(handle),
            other => {
                self.cursor = other;
                Err(DecodeError::Unsupported("no archive entry is selected".into()))
            }
        }
    }

    fn entry_error(&self, err: UnrarError) -> DecodeError {
        let encrypted = self.current.as_ref().is_some_and(|current| current.encrypted);
        if encrypted && matches!(err.code, Code::BadData) {
            DecodeError::BadPassword
        } else {
            map_unrar_error(err)
        }
    }
}

impl EntryStream for UnrarStream {
    fn next_entry(&mut self) -> Result<Option<EntryHeader>, DecodeError> {
        let header_cursor = match self.cursor.take() {
            Some(Cursor::Header(handle)) => handle,
            Some(Cursor::File(handle)) => handle.skip().map_err(|err| self.entry_error(err))?,
            Some(Cursor::Finished) => {
                self.cursor = Some(Cursor::Finished);
                return Ok(None);
            }
            None => {
                return Err(DecodeError::Corrupt(
                    "decoder stopped after an earlier error".into(),
                ))
            }
        };

        match header_cursor.read_header().map_err(map_unrar_error)? {
            Some(file) => {
                let entry = file.entry();
                let facts = self
                    .layout
                    .entries
                    .get(self.position)
                    .filter(|facts| facts.name == entry.filename.to_string_lossy());
                if facts.is_none() {
                    log::debug!(
                        "No listed header matches {:?}; reading its attributes heuristically",
                        entry.filename
                    );
                }
                let header = entry_header(
                    &entry.filename,
                    entry.is_directory(),
                    entry.file_attr,
                    entry.file_time,
                    facts,
                );
                self.current = Some(Current {
                    encrypted: entry.is_encrypted(),
                    unpacked_size: entry.unpacked_size,
                    link_target: facts.and_then(|facts| facts.link_target.clone()),
                });
                self.position += 1;
                self.cursor = Some(Cursor::File(file));
                Ok(Some(header))
            }
            None => {
                self.cursor = Some(Cursor::Finished);
                self.current = None;
                Ok(None)
            }
        }
    }

    fn open_entry(&mut self) -> Result<Box<dyn Read + '_>, DecodeError> {
        let handle = self.take_file()?;
        if let Some(target) = self.current.as_ref().and_then(|c| c.link_target.clone()) {
            let next = handle.skip().map_err(|err| self.entry_error(err))?;
            self.cursor = Some(Cursor::Header(next));
            return Ok(Box::new(ByteCursor::new(target.into_bytes())));
        }

        let size = self.current.as_ref().map_or(0, |current| current.unpacked_size);
        if size > MAX_SYMLINK_TARGET_BYTES as u64 {
            return Err(DecodeError::Unsupported(format!(
                "entry of {size} bytes is too large to buffer"
            )));
        }
        let (bytes, next) = handle.read().map_err(|err| self.entry_error(err))?;
        self.cursor = Some(Cursor::Header(next));
        Ok(Box::new(ByteCursor::new(bytes)))
    }

    fn extract_entry(&mut self, target: &Path) -> Result<(), DecodeError> {
        if target.to_string_lossy().contains('\0') {
            return Err(DecodeError::Unsupported(format!(
                "target path {} contains NUL",
                target.display()
            )));
        }
        let handle = self.take_file()?;
        let next = handle.extract_to(target).map_err(|err| self.entry_error(err))?;
        self.cursor = Some(Cursor::Header(next));
        Ok(())
    }

    /// The first volume plus every volume UnRAR switched to while listing headers.
    fn volumes(&self) -> Vec<PathBuf> {
        let mut volumes = vec![self.first_volume.clone()];
        for volume in &self.layout.volumes {
            if !volumes.contains(volume) {
                volumes.push(volume.clone());
            }
        }
        volumes
    }
}

fn check_dictionaries(path: &Path, layout: &Layout, limit: u64) -> Result<(), DecodeError> {
    match layout.entries.iter().find(|entry| entry.dictionary_bytes > limit) {
        Some(entry) => {
            log::debug!(
                "{}: entry {:?} needs a {} byte dictionary",
                path.display(),
                entry.name,
                entry.dictionary_bytes
            );
            Err(DecodeError::DictionaryTooLarge { limit })
        }
        None => Ok(()),
    }
}

fn map_unrar_error(err: UnrarError) -> DecodeError {
    match err.code {
        Code::MissingPassword => DecodeError::PasswordRequired,
        Code::BadPassword => DecodeError::BadPassword,
        Code::EOpen | Code::ERead | Code::ECreate | Code::EWrite => {
            DecodeError::Io(io::Error::other(err.to_string()))
        }
        Code::UnknownFormat => DecodeError::Unsupported(err.to_string()),
        _ => DecodeError::Corrupt(err.to_string()),
    }
}

fn entry_header(
    name: &Path,
    is_dir: bool,
    attr: u32,
    dos_time: u32,
    facts: Option<&HeaderFacts>,
) -> EntryHeader {
    let unix_mode = match facts.map(|facts| facts.host) {
        Some(HostOs::Windows) => None,
        Some(HostOs::Unix) | None => plausible_unix_mode(attr),
    };
    let kind = if is_dir {
        EntryKind::Directory
    } else if facts.is_some_and(|facts| facts.link_target.is_some())
        || unix_mode.is_some_and(|mode| mode & S_IFMT == S_IFLNK)
    {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };
    EntryHeader {
        name: name.to_string_lossy().into_owned(),
        kind,
        mode: unix_mode.map(|mode| mode & 0o7777),
        modified: from_dos_time(dos_time),
    }
}

/// Accept `attr` as a Unix mode only when it names a regular file, directory or symlink
/// the owner can read. Windows attribute words such as NOT_CONTENT_INDEXED (0x2000)
/// overlap the file-type bits and fail this test.
fn plausible_unix_mode(attr: u32) -> Option<u32> {
    let known_type = matches!(attr & S_IFMT, S_IFREG | S_IFDIR | S_IFLNK);
    (known_type && attr & OWNER_READ != 0 && attr >> 16 == 0).then_some(attr)
}

/// Convert an MS-DOS packed timestamp into a `SystemTime`.
fn from_dos_time(raw: u32) -> Option<SystemTime> {
    if raw == 0 {
        return None;
    }
    let second = ((raw & 0x1f) * 2) as u8;
    let minute = ((raw >> 5) & 0x3f) as u8;
    let hour = ((raw >> 11) & 0x1f) as u8;
    let day = ((raw >> 16) & 0x1f) as u8;
    let month = Month::try_from(((raw >> 21) & 0x0f) as u8).ok()?;
    let year = 1980 + ((raw >> 25) & 0x7f) as i32;

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().into())
}
