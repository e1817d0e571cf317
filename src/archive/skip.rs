//! Detecting archives whose contents are already in place.

use std::fs;
use std::io;
use std::path::Path;

use crate::decode::{ArchiveDecoder, EntryKind, ExtractionSettings};

use super::header::entry_destination;
use super::ExtractError;

/// Whether every non-directory entry of `archive` already exists under `dest_root`.
///
/// An entry whose name would be refused at extraction time counts as not present.
pub fn already_extracted<D: ArchiveDecoder + ?Sized>(
    decoder: &D,
    archive: &Path,
    dest_root: &Path,
    full_path: bool,
    settings: &ExtractionSettings,
) -> Result<bool, ExtractError> {
    for entry in decoder.list(archive, settings)? {
        if entry.is_dir {
            continue;
        }
        let Ok(Some(relative)) = entry_destination(&entry.name, EntryKind::File, full_path) else {
            return Ok(false);
        };
        let target = relative.resolve_in(dest_root);
        match fs::symlink_metadata(&target) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(ExtractError::Io { path: target, source }),
        }
    }
    Ok(true)
}
