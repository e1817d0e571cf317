//! Post-extraction cleanup hooks.
//!
//! The catalog is closed: [`HookKind::ALL`] lists every hook in the order `all` runs them.
//! Hooks only ever see paths through [`CleanupContext`] and must be safe to run twice.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;
use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

use crate::finder;

/// Selection token that disables cleanup.
pub const NONE: &str = "none";
/// Selection token that runs the whole catalog.
pub const ALL: &str = "all";

const SAMPLE_VIDEO_EXTENSIONS: &str = "asf|avi|mkv|mp4|m4v|mov|mpg|mpeg|ogg|webm|wmv";

/// Paths and mode handed to each hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupContext {
    /// Where extracted content landed.
    pub extraction_root: PathBuf,
    /// Directory holding the archive volumes.
    pub archive_dir: PathBuf,
    pub stem: String,
    pub dry_run: bool,
}

/// Built-in cleanup operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Nfo,
    Rar,
    OsxJunk,
    WindowsJunk,
    CoversFolders,
    ProofFolders,
    SampleFolders,
    SampleVideos,
    EmptyFolders,
}

impl HookKind {
    /// Every hook, in execution order.
    pub const ALL: [HookKind; 9] = [
        HookKind::Nfo,
        HookKind::Rar,
        HookKind::OsxJunk,
        HookKind::WindowsJunk,
        HookKind::CoversFolders,
        HookKind::ProofFolders,
        HookKind::SampleFolders,
        HookKind::SampleVideos,
        HookKind::EmptyFolders,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            HookKind::Nfo => "nfo",
            HookKind::Rar => "rar",
            HookKind::OsxJunk => "osx_junk",
            HookKind::WindowsJunk => "windows_junk",
            HookKind::CoversFolders => "covers_folders",
            HookKind::ProofFolders => "proof_folders",
            HookKind::SampleFolders => "sample_folders",
            HookKind::SampleVideos => "sample_videos",
            HookKind::EmptyFolders => "empty_folders",
        }
    }

    #[must_use]
    pub fn help(self) -> &'static str {
        match self {
            HookKind::Nfo => "Remove <stem>.nfo from the extraction root.",
            HookKind::Rar => "Remove RAR volumes and matching SFV files next to the archive.",
            HookKind::OsxJunk => "Remove .DS_Store from the extraction root.",
            HookKind::WindowsJunk => "Remove Thumbs.db from the extraction root.",
            HookKind::CoversFolders => {
                "Remove directories named covers recursively from the extraction root."
            }
            HookKind::ProofFolders => {
                "Remove directories named proof recursively from the extraction root."
            }
            HookKind::SampleFolders => {
                "Remove directories named sample recursively from the extraction root."
            }
            HookKind::SampleVideos => "Remove root sample video files related to the archive stem.",
            HookKind::EmptyFolders => {
                "Remove empty directories recursively from the archive directory."
            }
        }
    }

    /// Look a hook up by its exact name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Run this hook against `ctx`.
    pub fn run(self, ctx: &CleanupContext) -> io::Result<()> {
        match self {
            HookKind::Nfo => remove_file(
                &ctx.extraction_root.join(format!("{}.nfo", ctx.stem)),
                ctx.dry_run,
            ),
            HookKind::Rar => remove_matching(
                &ctx.archive_dir,
                &finder::volume_pattern(&ctx.stem, true),
                ctx.dry_run,
            ),
            HookKind::OsxJunk => remove_file(&ctx.extraction_root.join(".DS_Store"), ctx.dry_run),
            HookKind::WindowsJunk => {
                remove_file(&ctx.extraction_root.join("Thumbs.db"), ctx.dry_run)
            }
            HookKind::CoversFolders => remove_named_dirs(&ctx.extraction_root, "covers", ctx.dry_run),
            HookKind::ProofFolders => remove_named_dirs(&ctx.extraction_root, "proof", ctx.dry_run),
            HookKind::SampleFolders => {
                remove_named_dirs(&ctx.extraction_root, "sample", ctx.dry_run)
            }
            HookKind::SampleVideos => remove_matching(
                &ctx.extraction_root,
                &sample_video_pattern(&ctx.stem),
                ctx.dry_run,
            ),
            HookKind::EmptyFolders => prune_empty_dirs(&ctx.archive_dir, true, ctx.dry_run).map(drop),
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Invalid `--clean` selection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("clean hook selection is empty")]
    Empty,
    #[error("clean hook selection contains an empty item")]
    EmptyItem,
    #[error("unknown clean hook {0:?}")]
    Unknown(String),
    #[error("{0:?} cannot be combined with other clean hooks")]
    ExclusiveToken(&'static str),
}

/// Parse a comma-separated hook selection.
///
/// Names are trimmed and lower-cased, repeats keep their first position, and the
/// `none`/`all` tokens must stand alone.
pub fn parse_selection(spec: &str) -> Result<Vec<String>, SelectionError> {
    if spec.trim().is_empty() {
        return Err(SelectionError::Empty);
    }

    let mut selection: Vec<String> = Vec::new();
    for item in spec.split(',') {
        let name = item.trim().to_lowercase();
        if name.is_empty() {
            return Err(SelectionError::EmptyItem);
        }
        if !is_known(&name) {
            return Err(SelectionError::Unknown(name));
        }
        if !selection.contains(&name) {
            selection.push(name);
        }
    }

    if selection.len() > 1 {
        for token in [NONE, ALL] {
            if selection.iter().any(|name| name == token) {
                return Err(SelectionError::ExclusiveToken(token));
            }
        }
    }
    Ok(selection)
}

/// Whether a selection asks for any hook to run.
#[must_use]
pub fn is_active(selection: &[String]) -> bool {
    !(selection.is_empty() || (selection.len() == 1 && selection[0] == NONE))
}

fn is_known(name: &str) -> bool {
    name == NONE || name == ALL || HookKind::from_name(name).is_some()
}

fn resolve(selection: &[String]) -> Vec<&str> {
    if !is_active(selection) {
        return Vec::new();
    }
    if selection.len() == 1 && selection[0] == ALL {
        return HookKind::ALL.iter().map(|kind| kind.name()).collect();
    }
    let mut names: Vec<&str> = Vec::with_capacity(selection.len());
    for name in selection {
        let name = name.as_str();
        if name == NONE || name == ALL || names.contains(&name) {
            continue;
        }
        names.push(name);
    }
    names
}

/// One hook that could not complete.
#[derive(Debug, Error)]
pub enum HookFailure {
    #[error("unknown clean hook {0:?}")]
    Unknown(String),
    #[error("{hook}: {source}")]
    Failed {
        hook: HookKind,
        #[source]
        source: io::Error,
    },
}

/// Every failure from one [`run_selected`] pass.
#[derive(Debug)]
pub struct HookRunError {
    pub failures: Vec<HookFailure>,
}

impl fmt::Display for HookRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.failures.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for HookRunError {}

/// Run the selected hooks, continuing past failures and reporting them together.
pub fn run_selected(selection: &[String], ctx: &CleanupContext) -> Result<(), HookRunError> {
    let mut failures = Vec::new();
    for name in resolve(selection) {
        let Some(kind) = HookKind::from_name(name) else {
            failures.push(HookFailure::Unknown(name.to_owned()));
            continue;
        };
        log::debug!("Running clean hook {name:?}");
        if let Err(source) = kind.run(ctx) {
            failures.push(HookFailure::Failed { hook: kind, source });
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(HookRunError { failures })
    }
}

/// Help text listing the catalog, for `--help`.
#[must_use]
pub fn help_text() -> String {
    let mut out = String::from("Clean hooks (for --clean, comma separated):\n");
    out.push_str("  none             Run no cleanup (default).\n");
    out.push_str("  all              Run every hook below, in order.\n");
    for kind in HookKind::ALL {
        out.push_str(&format!("  {:<16} {}\n", kind.name(), kind.help()));
    }
    out
}

fn sample_video_pattern(stem: &str) -> Regex {
    let pattern = format!(
        r"(?i)^sample.*{}\.({SAMPLE_VIDEO_EXTENSIONS})$",
        regex::escape(stem)
    );
    Regex::new(&pattern).expect("escaped stem always forms a valid pattern")
}

fn remove_file(path: &Path, dry_run: bool) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if metadata.is_dir() {
        return Ok(());
    }
    if dry_run {
        log::debug!("Dry-run: remove file {:?}", path.display().to_string());
        return Ok(());
    }
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_matching(dir: &Path, pattern: &Regex, dry_run: bool) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(|name| pattern.is_match(name)) {
            remove_file(&entry.path(), dry_run)?;
        }
    }
    Ok(())
}

fn remove_named_dirs(root: &Path, target: &str, dry_run: bool) -> io::Result<()> {
    let mut matches = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir()
            && entry.file_name().to_string_lossy().eq_ignore_ascii_case(target)
        {
            matches.push(entry.into_path());
        }
    }

    matches.sort_by_key(|path| std::cmp::Reverse(path.components().count()));
    for path in matches {
        if dry_run {
            log::debug!("Dry-run: remove directory tree {:?}", path.display().to_string());
            continue;
        }
        match fs::remove_dir_all(&path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
            _ => {}
        }
    }
    Ok(())
}

// Returns whether `dir` ended up (or would end up) empty.
fn prune_empty_dirs(dir: &Path, is_root: bool, dry_run: bool) -> io::Result<bool> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err),
    };

    let mut empty = true;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            empty = false;
            continue;
        }
        if !prune_empty_dirs(&entry.path(), false, dry_run)? {
            empty = false;
        }
    }

    if is_root || !empty {
        return Ok(empty);
    }
    if dry_run {
        log::debug!("Dry-run: remove empty directory {:?}", dir.display().to_string());
        return Ok(true);
    }
    match fs::remove_dir(dir) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(true),
    }
}
