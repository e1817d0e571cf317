//! Streaming extraction into a staging directory, with password retry.

use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use filetime::FileTime;
use thiserror::Error;

use crate::decode::{
    ArchiveDecoder, DecodeError, EntryHeader, EntryKind, EntryStream, ExtractionSettings,
};
use crate::policy::{
    decode_symlink_target, sanitize_symlink_target, PathError, SanitizedPath,
    MAX_SYMLINK_TARGET_BYTES,
};

pub mod header;
pub mod passwords;
pub mod signature;
pub mod skip;

pub use self::header::entry_destination;
pub use self::passwords::load_passwords;
pub use self::signature::has_archive_signature;
pub use self::skip::already_extracted;

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionOutcome {
    /// Volume files the decoder consumed, in order.
    pub volumes: Vec<PathBuf>,
    pub used_password: bool,
    /// Password that unlocked the archive, when one was needed.
    pub password: Option<String>,
}

/// Errors raised while extracting a single archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unsafe path in archive: {0:?}")]
    UnsafePath(String),
    #[error(
        "archive entry {0:?} is a symlink and symlink extraction is disabled (use --allow-symlinks to override)"
    )]
    SymlinkDisabled(String),
    #[error("archive entry {name:?} would be written through symlink {}", link.display())]
    ThroughSymlink { name: String, link: PathBuf },
    #[error("extract symlink {name:?}")]
    UnsafeSymlink {
        name: String,
        #[source]
        source: PathError,
    },
    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}", password_required_message(.archive, .password_file, .reason))]
    PasswordRequired {
        archive: PathBuf,
        password_file: Option<PathBuf>,
        reason: String,
    },
}

impl ExtractError {
    /// Whether the failure came from a missing or wrong password.
    #[must_use]
    pub fn is_password_error(&self) -> bool {
        matches!(self, Self::Decode(err) if err.is_password_error())
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn password_required_message(
    archive: &Path,
    password_file: &Option<PathBuf>,
    reason: &str,
) -> String {
    match password_file {
        Some(file) => format!(
            "archive {:?} is encrypted; add password(s) to {:?} ({reason})",
            archive.display().to_string(),
            file.display().to_string()
        ),
        None => format!(
            "archive {:?} is encrypted and requires a password",
            archive.display().to_string()
        ),
    }
}

/// Extract `archive` into `staging`, retrying with each password from `password_file`
/// when the first, password-less attempt fails for lack of the right password.
///
/// Passwords are tried in file order and the first success wins. A failure that is not
/// password related is returned immediately.
pub fn extract_with_passwords<D: ArchiveDecoder + ?Sized>(
    decoder: &D,
    archive: &Path,
    staging: &Path,
    full_path: bool,
    settings: &ExtractionSettings,
    password_file: Option<&Path>,
) -> Result<ExtractionOutcome, ExtractError> {
    let first_error = match extract_to_dir(decoder, archive, staging, full_path, settings) {
        Ok(volumes) => {
            return Ok(ExtractionOutcome {
                volumes,
                used_password: false,
                password: None,
            })
        }
        Err(err) if err.is_password_error() => err,
        Err(err) => return Err(err),
    };

    let password_required = |reason: String| ExtractError::PasswordRequired {
        archive: archive.to_path_buf(),
        password_file: password_file.map(Path::to_path_buf),
        reason,
    };
    let Some(file) = password_file else {
        return Err(password_required("no password file configured".into()));
    };
    let passwords = load_passwords(file).map_err(|err| password_required(err.to_string()))?;
    if passwords.is_empty() {
        return Err(password_required("password file is empty".into()));
    }

    let mut last_error = first_error;
    for password in passwords {
        let attempt = settings.with_password(&password);
        match extract_to_dir(decoder, archive, staging, full_path, &attempt) {
            Ok(volumes) => {
                return Ok(ExtractionOutcome {
                    volumes,
                    used_password: true,
                    password: Some(password),
                })
            }
            Err(err) if err.is_password_error() => last_error = err,
            Err(err) => return Err(err),
        }
    }
    Err(last_error)
}

/// Stream every entry of `archive` into `dest` and return the volumes consumed.
///
/// The first unsafe or failing entry aborts the whole extraction; files written before
/// it stay in `dest` for the caller to deal with. No entry is ever written through a
/// symlink, whether it came from this archive or was already present under `dest`.
pub fn extract_to_dir<D: ArchiveDecoder + ?Sized>(
    decoder: &D,
    archive: &Path,
    dest: &Path,
    full_path: bool,
    settings: &ExtractionSettings,
) -> Result<Vec<PathBuf>, ExtractError> {
    let mut stream = decoder.open(archive, settings)?;

    while let Some(entry) = stream.next_entry()? {
        let Some(relative) = entry_destination(&entry.name, entry.kind, full_path)? else {
            continue;
        };
        let target = relative.resolve_in(dest);
        refuse_linked_parents(dest, &relative, &entry.name)?;

        match entry.kind {
            EntryKind::Symlink => {
                if !settings.allow_symlinks {
                    return Err(ExtractError::SymlinkDisabled(entry.name));
                }
                extract_symlink(stream.as_mut(), &entry, &relative, &target)?;
            }
            EntryKind::Directory => {
                refuse_link_at(&target, &entry.name)?;
                create_dir_with_mode(&target, entry.mode.unwrap_or(DEFAULT_DIR_MODE))
                    .map_err(|err| ExtractError::io(&target, err))?;
                apply_mtime(&target, entry.modified);
            }
            EntryKind::File => {
                refuse_link_at(&target, &entry.name)?;
                ensure_parent(&target)?;
                write_file(stream.as_mut(), &target, entry.mode)?;
                apply_mtime(&target, entry.modified);
            }
        }
    }

    Ok(stream.volumes())
}

fn extract_symlink(
    stream: &mut dyn EntryStream,
    entry: &EntryHeader,
    relative: &SanitizedPath,
    target: &Path,
) -> Result<(), ExtractError> {
    let unsafe_symlink = |source| ExtractError::UnsafeSymlink {
        name: entry.name.clone(),
        source,
    };
    let raw = read_link_bytes(stream.open_entry()?)?;
    let raw = decode_symlink_target(&raw).map_err(unsafe_symlink)?;
    let link_target = sanitize_symlink_target(relative, &raw).map_err(unsafe_symlink)?;

    ensure_parent(target)?;
    if fs::symlink_metadata(target).is_ok_and(|meta| meta.file_type().is_symlink()) {
        fs::remove_file(target).map_err(|err| ExtractError::io(target, err))?;
    }
    create_symlink(link_target.as_std_path(), target).map_err(|err| ExtractError::io(target, err))
}

fn read_link_bytes(reader: Box<dyn Read + '_>) -> Result<Vec<u8>, DecodeError> {
    let mut raw = Vec::with_capacity(256);
    reader
        .take(MAX_SYMLINK_TARGET_BYTES as u64 + 1)
        .read_to_end(&mut raw)
        .map_err(DecodeError::from_io)?;
    Ok(raw)
}

/// Fail when any existing directory between `dest` and the entry is a symlink.
fn refuse_linked_parents(
    dest: &Path,
    relative: &SanitizedPath,
    name: &str,
) -> Result<(), ExtractError> {
    let mut current = dest.to_path_buf();
    for segment in relative.parent().components() {
        current.push(segment.as_str());
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ExtractError::ThroughSymlink {
                    name: name.to_owned(),
                    link: current,
                })
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(ExtractError::io(&current, err)),
        }
    }
    Ok(())
}

fn refuse_link_at(target: &Path, name: &str) -> Result<(), ExtractError> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => Err(ExtractError::ThroughSymlink {
            name: name.to_owned(),
            link: target.to_path_buf(),
        }),
        _ => Ok(()),
    }
}

fn ensure_parent(target: &Path) -> Result<(), ExtractError> {
    match target.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|err| ExtractError::io(parent, err)),
        None => Ok(()),
    }
}

fn write_file(
    stream: &mut dyn EntryStream,
    target: &Path,
    mode: Option<u32>,
) -> Result<(), ExtractError> {
    let result = stream
        .extract_entry(target)
        .map_err(ExtractError::from)
        .and_then(|()| finish_file(target, mode.filter(|m| *m & 0o777 != 0)));
    if result.is_err() {
        let _ = fs::remove_file(target);
    }
    result
}

fn finish_file(target: &Path, mode: Option<u32>) -> Result<(), ExtractError> {
    let file = OpenOptions::new()
        .write(true)
        .open(target)
        .map_err(|err| ExtractError::io(target, err))?;
    file.sync_all().map_err(|err| ExtractError::io(target, err))?;
    drop(file);
    set_mode(target, mode.unwrap_or(DEFAULT_FILE_MODE)).map_err(|err| ExtractError::io(target, err))
}

fn apply_mtime(path: &Path, modified: Option<SystemTime>) {
    if let Some(modified) = modified {
        let _ = filetime::set_file_mtime(path, FileTime::from_system_time(modified));
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_dir_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    let mode = if mode & 0o777 == 0 { DEFAULT_DIR_MODE } else { mode };
    fs::DirBuilder::new().recursive(true).mode(mode).create(path)
}

#[cfg(not(unix))]
fn create_dir_with_mode(path: &Path, _mode: u32) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn create_symlink(link_target: &Path, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link_target, at)
}

#[cfg(windows)]
fn create_symlink(link_target: &Path, at: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(link_target, at)
}
