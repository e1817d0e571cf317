//! Discovery of first-volume archives below a directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use fs_err as fs;
use regex::Regex;

/// A file that looks like the volume an extractor should open first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// Archive base name without its volume suffix.
    pub stem: String,
}

impl Candidate {
    /// Directory that holds the archive.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn part_volume_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(.*)\.part([0-9]+)\.rar$").expect("part volume pattern compiles")
    })
}

/// Classify `name` and return the archive stem when it is a first volume.
///
/// Recognised, in order: `<stem>.001`, `<stem>.partN.rar` with `N == 1`, and any other
/// `<stem>.rar`. Later parts such as `.part02.rar`, `.r00` or `.002` yield `None`.
#[must_use]
pub fn is_first_volume(name: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".001") {
        return Some(name[..name.len() - 4].to_owned());
    }
    if let Some(captures) = part_volume_re().captures(name) {
        let part: u64 = captures[2].parse().ok()?;
        return (part == 1).then(|| captures[1].to_owned());
    }
    if lower.ends_with(".rar") {
        return Some(name[..name.len() - 4].to_owned());
    }
    None
}

/// Walk `root` and collect first-volume candidates, sorted case-insensitively by path.
///
/// `max_depth` bounds how many directory levels below `root` are entered; `None` walks
/// the whole tree. Directories past the bound are never read. Symlinked directories are
/// not followed. Any I/O error aborts the scan.
pub fn scan(root: &Path, max_depth: Option<u32>) -> io::Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    let mut pending = vec![(root.to_path_buf(), 0_u32)];

    while let Some((dir, depth)) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if max_depth.map_or(true, |limit| depth < limit) {
                    pending.push((entry.path(), depth + 1));
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(stem) = is_first_volume(name) {
                candidates.push(Candidate {
                    path: entry.path(),
                    stem,
                });
            }
        }
    }

    candidates.sort_by_cached_key(|candidate| candidate.path.to_string_lossy().to_lowercase());
    Ok(candidates)
}

/// Whether `name` is one of the volume files belonging to `stem`
/// (`.rar`, `.partN.rar`, `.rNN`..`.zNN`, or a bare number).
#[must_use]
pub fn is_volume_of(stem: &str, name: &str) -> bool {
    volume_pattern(stem, false).is_match(name)
}

/// Case-insensitive pattern over the volume names of `stem`, optionally including the
/// `<stem>.sfv` checksum sidecar.
#[must_use]
pub fn volume_pattern(stem: &str, include_sfv: bool) -> Regex {
    let sfv = if include_sfv { "sfv|" } else { "" };
    let pattern = format!(
        r"(?i)^{}\.({sfv}[0-9]+|[r-z][0-9]+|rar|part[0-9]+\.rar)$",
        regex::escape(stem)
    );
    Regex::new(&pattern).expect("escaped stem always forms a valid pattern")
}

/// Sibling volume files of the first volume at `first`, in volume order.
pub fn volume_set(first: &Path) -> io::Result<Vec<PathBuf>> {
    let Some(name) = first.file_name().and_then(|name| name.to_str()) else {
        return Ok(vec![first.to_path_buf()]);
    };
    let Some(stem) = is_first_volume(name) else {
        return Ok(vec![first.to_path_buf()]);
    };
    let dir = first.parent().unwrap_or_else(|| Path::new("."));
    let pattern = volume_pattern(&stem, false);

    let mut volumes = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(|n| pattern.is_match(n)) {
            volumes.push(entry.path());
        }
    }
    volumes.sort_by_cached_key(|path| volume_order(path, &stem));
    Ok(volumes)
}

// `.rar` sorts before `.r00`, numbered parts by number.
fn volume_order(path: &Path, stem: &str) -> (u8, u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let suffix = name.get(stem.len() + 1..).unwrap_or_default().to_owned();
    if let Some(captures) = part_volume_re().captures(&name) {
        return (0, captures[2].parse().unwrap_or(u64::MAX), suffix);
    }
    if suffix == "rar" {
        return (1, 0, suffix);
    }
    if let Ok(number) = suffix.parse::<u64>() {
        return (3, number, suffix);
    }
    (2, 0, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn recognises_first_volumes() {
        let cases = [
            ("release.rar", Some("release")),
            ("release.part01.rar", Some("release")),
            ("release.PART001.RAR", Some("release")),
            ("release.part1.rar", Some("release")),
            ("release.part02.rar", None),
            ("release.001", Some("release")),
            ("release.002", None),
            ("release.r00", None),
            ("notes.txt", None),
        ];
        for (name, stem) in cases {
            assert_eq!(is_first_volume(name).as_deref(), stem, "{name}");
        }
    }

    fn touch(path: &Path) {
        fs::write(path, b"x").expect("write fixture");
    }

    fn names(candidates: &[Candidate]) -> Vec<String> {
        let mut out: Vec<_> = candidates
            .iter()
            .map(|c| c.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn scan_respects_depth_and_filters() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path();
        for name in [
            "movie.rar",
            "movie.r00",
            "series.part01.rar",
            "series.part02.rar",
            "pack.001",
            "pack.002",
        ] {
            touch(&root.join(name));
        }
        let nested = root.join("nested");
        fs::create_dir_all(nested.join("deeper")).unwrap();
        touch(&nested.join("deep.part1.rar"));
        touch(&nested.join("deeper").join("too-deep.rar"));

        assert_eq!(
            names(&scan(root, Some(0)).unwrap()),
            ["movie.rar", "pack.001", "series.part01.rar"]
        );
        assert_eq!(
            names(&scan(root, Some(1)).unwrap()),
            ["deep.part1.rar", "movie.rar", "pack.001", "series.part01.rar"]
        );
        assert_eq!(
            names(&scan(root, None).unwrap()),
            [
                "deep.part1.rar",
                "movie.rar",
                "pack.001",
                "series.part01.rar",
                "too-deep.rar"
            ]
        );
    }

    #[test]
    fn scan_orders_case_insensitively() {
        let tmp = tempdir().expect("tempdir");
        touch(&tmp.path().join("b.rar"));
        touch(&tmp.path().join("A.rar"));
        touch(&tmp.path().join("c.rar"));
        let found = scan(tmp.path(), None).unwrap();
        let stems: Vec<_> = found.iter().map(|c| c.stem.as_str()).collect();
        assert_eq!(stems, ["A", "b", "c"]);
    }

    #[test]
    fn scan_missing_root_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        assert!(scan(&tmp.path().join("missing"), None).is_err());
    }

    #[test]
    fn volume_set_lists_sibling_parts_in_order() {
        let tmp = tempdir().expect("tempdir");
        for name in ["show.r01", "show.rar", "show.r00", "show.sfv", "other.rar"] {
            touch(&tmp.path().join(name));
        }
        let volumes = volume_set(&tmp.path().join("show.rar")).unwrap();
        let names: Vec<_> = volumes
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["show.rar", "show.r00", "show.r01"]);
        assert!(is_volume_of("show", "SHOW.R00"));
        assert!(!is_volume_of("show", "show.sfv"));
        assert!(volume_pattern("show", true).is_match("show.sfv"));
    }
}
