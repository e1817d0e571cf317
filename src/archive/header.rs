//! Mapping archive entry names onto extraction paths.

use crate::decode::EntryKind;
use crate::policy::{sanitize_entry_path, SanitizedPath};

use super::ExtractError;

/// Where an entry lands relative to the extraction root.
///
/// In flat mode directory entries are dropped (`Ok(None)`) and everything else keeps only
/// its final name segment. Names that fail sanitisation are refused, never rewritten.
pub fn entry_destination(
    name: &str,
    kind: EntryKind,
    full_path: bool,
) -> Result<Option<SanitizedPath>, ExtractError> {
    if !full_path && kind == EntryKind::Directory {
        return Ok(None);
    }
    let sanitized = if full_path {
        sanitize_entry_path(name)
    } else {
        sanitize_entry_path(base_name(name))
    };
    sanitized
        .map(Some)
        .ok_or_else(|| ExtractError::UnsafePath(name.to_owned()))
}

fn base_name(name: &str) -> &str {
    let trimmed = name.trim_end_matches(['/', '\\']);
    trimmed.rsplit(['/', '\\']).next().unwrap_or_default()
}
