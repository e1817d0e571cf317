//! Shared fixtures: a decoder over JSON-described archives.
//!
//! A fixture archive is the RAR5 marker followed by a JSON document, so it passes the
//! signature check while its contents stay readable in tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use unrarall::decode::{
    ArchiveDecoder, DecodeError, EntryHeader, EntryKind, EntryStream, ExtractionSettings,
    ListedEntry,
};
use unrarall::finder;

pub const RAR5_MARKER: &[u8] = &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureEntry {
    pub name: String,
    pub kind: FixtureKind,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl FixtureEntry {
    pub fn file(name: &str, data: impl AsRef<[u8]>) -> Self {
        Self {
            name: name.to_owned(),
            kind: FixtureKind::File,
            data: data.as_ref().to_vec(),
        }
    }

    pub fn dir(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: FixtureKind::Dir,
            data: Vec::new(),
        }
    }

    pub fn symlink(name: &str, target: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: FixtureKind::Symlink,
            data: target.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureArchive {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub dictionary_bytes: Option<u64>,
    pub entries: Vec<FixtureEntry>,
}

impl FixtureArchive {
    pub fn new(entries: Vec<FixtureEntry>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_owned());
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = RAR5_MARKER.to_vec();
        bytes.extend(serde_json::to_vec(self).expect("fixture serializes"));
        bytes
    }
}

pub fn write_archive(path: &Path, archive: &FixtureArchive) -> io::Result<()> {
    fs::write(path, archive.to_bytes())
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Decoder over fixture archives that records every password it is offered.
#[derive(Debug, Default)]
pub struct JsonDecoder {
    attempts: Mutex<Vec<Option<String>>>,
}

impl JsonDecoder {
    pub fn attempts(&self) -> Vec<Option<String>> {
        self.attempts.lock().expect("attempts lock").clone()
    }

    fn load(&self, path: &Path, settings: &ExtractionSettings) -> Result<FixtureArchive, DecodeError> {
        self.attempts
            .lock()
            .expect("attempts lock")
            .push(settings.password.clone());

        let bytes = fs::read(path)?;
        let body = bytes
            .strip_prefix(RAR5_MARKER)
            .ok_or_else(|| DecodeError::Unsupported("not a fixture archive".into()))?;
        let archive: FixtureArchive =
            serde_json::from_slice(body).map_err(|err| DecodeError::Corrupt(err.to_string()))?;

        if let Some(needed) = archive.dictionary_bytes {
            if needed > settings.max_dictionary_bytes {
                return Err(DecodeError::DictionaryTooLarge {
                    limit: settings.max_dictionary_bytes,
                });
            }
        }
        match (&archive.password, &settings.password) {
            (None, _) => {}
            (Some(_), None) => return Err(DecodeError::PasswordRequired),
            (Some(expected), Some(given)) if expected != given => {
                return Err(DecodeError::BadPassword)
            }
            (Some(_), Some(_)) => {}
        }
        Ok(archive)
    }
}

impl ArchiveDecoder for JsonDecoder {
    fn open<'a>(
        &'a self,
        path: &Path,
        settings: &ExtractionSettings,
    ) -> Result<Box<dyn EntryStream + 'a>, DecodeError> {
        let archive = self.load(path, settings)?;
        Ok(Box::new(JsonStream {
            first_volume: path.to_path_buf(),
            pending: archive.entries.into(),
            current: None,
        }))
    }

    fn list(
        &self,
        path: &Path,
        settings: &ExtractionSettings,
    ) -> Result<Vec<ListedEntry>, DecodeError> {
        let archive = self.load(path, settings)?;
        let encrypted = archive.password.is_some();
        Ok(archive
            .entries
            .into_iter()
            .map(|entry| ListedEntry {
                name: entry.name,
                is_dir: entry.kind == FixtureKind::Dir,
                encrypted,
            })
            .collect())
    }
}

struct JsonStream {
    first_volume: PathBuf,
    pending: VecDeque<FixtureEntry>,
    current: Option<FixtureEntry>,
}

impl EntryStream for JsonStream {
    fn next_entry(&mut self) -> Result<Option<EntryHeader>, DecodeError> {
        self.current = self.pending.pop_front();
        Ok(self.current.as_ref().map(|entry| EntryHeader {
            name: entry.name.clone(),
            kind: match entry.kind {
                FixtureKind::File => EntryKind::File,
                FixtureKind::Dir => EntryKind::Directory,
                FixtureKind::Symlink => EntryKind::Symlink,
            },
            mode: None,
            modified: None,
        }))
    }

    fn open_entry(&mut self) -> Result<Box<dyn Read + '_>, DecodeError> {
        let entry = self
            .current
            .as_ref()
            .ok_or_else(|| DecodeError::Unsupported("no entry selected".into()))?;
        Ok(Box::new(Cursor::new(entry.data.clone())))
    }

    fn volumes(&self) -> Vec<PathBuf> {
        finder::volume_set(&self.first_volume).unwrap_or_else(|_| vec![self.first_volume.clone()])
    }
}
