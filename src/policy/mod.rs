//! Path-safety checks applied to every name that comes out of an archive.
//!
//! Entry locations and symlink targets are validated separately: a symlink stored at a
//! perfectly safe location can still point anywhere, so its target goes through
//! [`sanitize_symlink_target`] on top of the [`sanitize_entry_path`] check for the link
//! itself.
use std::fmt;
use std::path::{Path, PathBuf};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use path_clean::PathClean;
use thiserror::Error;

/// Upper bound on the stored bytes of a symlink target.
pub const MAX_SYMLINK_TARGET_BYTES: usize = 4096;

/// A relative path that cannot escape whatever root it is joined to.
///
/// Only [`sanitize_entry_path`] constructs values of this type, so holding one means the
/// path has no root or drive prefix, no `.`/`..` segment and no NUL byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SanitizedPath(Utf8PathBuf);

impl SanitizedPath {
    /// Borrow the relative path.
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    /// Borrow the relative path as a `std` path.
    #[must_use]
    pub fn as_std_path(&self) -> &Path {
        self.0.as_std_path()
    }

    /// Join the path under `root`.
    #[must_use]
    pub fn resolve_in(&self, root: &Path) -> PathBuf {
        root.join(self.0.as_std_path())
    }

    /// Directory that holds this entry, relative to the root (empty at the top level).
    #[must_use]
    pub fn parent(&self) -> &Utf8Path {
        self.0.parent().unwrap_or_else(|| Utf8Path::new(""))
    }

    /// Final path segment.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.file_name().unwrap_or_default()
    }
}

impl fmt::Display for SanitizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons an archive-supplied path or link target is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("unsafe symlink target {0:?}")]
    UnsafeTarget(String),
    #[error("absolute symlink target {0:?} is not allowed")]
    AbsoluteTarget(String),
    #[error("symlink target {0:?} has a drive prefix")]
    DrivePrefix(String),
    #[error("symlink target {0:?} escapes extraction root")]
    TargetEscapes(String),
    #[error("symlink target exceeds {limit} bytes")]
    TargetTooLong { limit: usize },
    #[error("symlink target is empty")]
    EmptyTarget,
    #[error("symlink target contains NUL")]
    NulInTarget,
    #[error("symlink target is not valid UTF-8")]
    InvalidUtf8,
}

/// Normalise an archive entry name into a safe relative path.
///
/// Backslashes are treated as separators and the result is lexically cleaned before any
/// check runs; names that still point at or above the root are rejected rather than
/// rewritten.
#[must_use]
pub fn sanitize_entry_path(raw: &str) -> Option<SanitizedPath> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let cleaned = clean_slashed(trimmed)?;
    if has_drive_prefix(&cleaned) {
        return None;
    }

    let mut out = Utf8PathBuf::new();
    for component in cleaned.components() {
        match component {
            Utf8Component::Normal(segment) if !segment.contains('\0') => out.push(segment),
            _ => return None,
        }
    }

    if out.as_str().is_empty() {
        return None;
    }
    Some(SanitizedPath(out))
}

/// Validate the target of a symlink stored at `link`.
///
/// The target is resolved against the link's own directory; anything that climbs above
/// the extraction root is refused. On success the cleaned, still-relative target is
/// returned so the link keeps its original shape.
pub fn sanitize_symlink_target(link: &SanitizedPath, raw: &str) -> Result<Utf8PathBuf, PathError> {
    let cleaned = clean_slashed(raw).ok_or_else(|| PathError::UnsafeTarget(raw.to_owned()))?;
    if cleaned.as_str() == "." || cleaned.as_str() == ".." {
        return Err(PathError::UnsafeTarget(raw.to_owned()));
    }
    if cleaned.has_root() {
        return Err(PathError::AbsoluteTarget(raw.to_owned()));
    }
    if has_drive_prefix(&cleaned) {
        return Err(PathError::DrivePrefix(raw.to_owned()));
    }

    let resolved = clean_utf8(&link.parent().join(&cleaned))
        .ok_or_else(|| PathError::UnsafeTarget(raw.to_owned()))?;
    if matches!(
        resolved.components().next(),
        Some(Utf8Component::ParentDir) | None
    ) {
        return Err(PathError::TargetEscapes(raw.to_owned()));
    }

    let mut out = Utf8PathBuf::new();
    for component in cleaned.components() {
        match component {
            Utf8Component::ParentDir => out.push(".."),
            Utf8Component::Normal(segment) => out.push(segment),
            _ => return Err(PathError::UnsafeTarget(raw.to_owned())),
        }
    }
    Ok(out)
}

/// Validate the raw bytes of a symlink target stored as entry data.
///
/// Callers read at most [`MAX_SYMLINK_TARGET_BYTES`] + 1 bytes so an oversized target is
/// still detected here. Trailing NULs are ignored.
pub fn decode_symlink_target(raw: &[u8]) -> Result<String, PathError> {
    if raw.len() > MAX_SYMLINK_TARGET_BYTES {
        return Err(PathError::TargetTooLong {
            limit: MAX_SYMLINK_TARGET_BYTES,
        });
    }

    let value = std::str::from_utf8(raw).map_err(|_| PathError::InvalidUtf8)?;
    let value = value.trim_end_matches('\0');
    if value.is_empty() {
        return Err(PathError::EmptyTarget);
    }
    if value.contains('\0') {
        return Err(PathError::NulInTarget);
    }
    Ok(value.to_owned())
}

fn clean_slashed(raw: &str) -> Option<Utf8PathBuf> {
    let normalized = raw.replace('\\', "/");
    clean_utf8(Utf8Path::new(&normalized))
}

fn clean_utf8(path: &Utf8Path) -> Option<Utf8PathBuf> {
    let cleaned = path.as_std_path().to_path_buf().clean();
    Utf8PathBuf::from_path_buf(cleaned).ok()
}

fn has_drive_prefix(path: &Utf8Path) -> bool {
    match path.components().next() {
        Some(Utf8Component::Prefix(_)) => true,
        Some(Utf8Component::Normal(first)) => {
            let mut chars = first.chars();
            matches!(
                (chars.next(), chars.next()),
                (Some(letter), Some(':')) if letter.is_alphabetic()
            )
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn sanitized(raw: &str) -> SanitizedPath {
        sanitize_entry_path(raw).expect("plain path should sanitize")
    }

    #[test]
    fn accepts_plain_relative_paths() {
        assert_eq!(sanitized("dir/file.txt").as_path(), Utf8Path::new("dir/file.txt"));
        assert_eq!(sanitized("dir\\sub\\file.txt").as_path(), Utf8Path::new("dir/sub/file.txt"));
        assert_eq!(sanitized("./dir//file.txt").as_path(), Utf8Path::new("dir/file.txt"));
        assert_eq!(sanitized("a/b/../c.txt").as_path(), Utf8Path::new("a/c.txt"));
    }

    #[test]
    fn rejects_traversal_and_roots() {
        for raw in [
            "",
            "   ",
            ".",
            "..",
            "../escape.txt",
            "a/../../escape.txt",
            "..\\escape.txt",
            "/etc/passwd",
            "\\windows\\system32",
            "C:\\Windows\\evil.dll",
            "c:relative.txt",
            "dir/nul\0byte",
        ] {
            assert!(sanitize_entry_path(raw).is_none(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn symlink_target_stays_inside_root() {
        let link = sanitized("a/b/link");
        let target = sanitize_symlink_target(&link, "../c/file.txt").expect("in-tree target");
        assert_eq!(target, Utf8PathBuf::from("../c/file.txt"));

        let sibling = sanitize_symlink_target(&link, "file.txt").expect("sibling target");
        assert_eq!(sibling, Utf8PathBuf::from("file.txt"));
    }

    #[test]
    fn symlink_target_escape_is_rejected() {
        let link = sanitized("a/link");
        assert_eq!(
            sanitize_symlink_target(&link, "../../etc/passwd"),
            Err(PathError::TargetEscapes("../../etc/passwd".into()))
        );
        assert!(matches!(
            sanitize_symlink_target(&link, "/etc/passwd"),
            Err(PathError::AbsoluteTarget(_))
        ));
        assert!(matches!(
            sanitize_symlink_target(&link, "D:\\data"),
            Err(PathError::DrivePrefix(_))
        ));
        assert!(matches!(
            sanitize_symlink_target(&link, ".."),
            Err(PathError::UnsafeTarget(_))
        ));
    }

    #[test]
    fn top_level_link_cannot_point_to_parent() {
        let link = sanitized("link");
        assert!(matches!(
            sanitize_symlink_target(&link, "../outside"),
            Err(PathError::TargetEscapes(_))
        ));
    }

    #[test]
    fn decodes_symlink_targets() {
        assert_eq!(decode_symlink_target(&b"target.txt\0\0"[..]), Ok("target.txt".into()));
        assert_eq!(decode_symlink_target(&b""[..]), Err(PathError::EmptyTarget));
        assert_eq!(decode_symlink_target(&b"a\0b"[..]), Err(PathError::NulInTarget));

        let oversized = vec![b'a'; MAX_SYMLINK_TARGET_BYTES + 1];
        assert_eq!(
            decode_symlink_target(oversized.as_slice()),
            Err(PathError::TargetTooLong {
                limit: MAX_SYMLINK_TARGET_BYTES
            })
        );
    }

    proptest! {
        #[test]
        fn sanitized_paths_stay_within_root(
            segments in prop::collection::vec(
                prop_oneof![
                    "[a-z0-9]{1,6}".prop_map(|s| s),
                    Just("..".to_string()),
                    Just(".".to_string()),
                ],
                1..6,
            ),
            backslash in any::<bool>(),
        ) {
            let raw = segments.join(if backslash { "\\" } else { "/" });
            let tmp = tempdir().expect("tempdir");
            if let Some(path) = sanitize_entry_path(&raw) {
                let joined = path.resolve_in(tmp.path()).clean();
                prop_assert!(joined.starts_with(tmp.path()));
                prop_assert!(joined != tmp.path());
                prop_assert!(path.as_path().components().all(|c| matches!(c, Utf8Component::Normal(_))));
            }
        }
    }
}
