//! Moving staged extraction output into its destination.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use walkdir::WalkDir;

use super::Toolkit;

/// Everything found in a staging directory, relative to it and sorted.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct StagedTree {
    pub files: Vec<PathBuf>,
    pub empty_dirs: Vec<PathBuf>,
}

pub(crate) fn collect_staged(staging: &Path, allow_symlinks: bool) -> Result<StagedTree> {
    let mut tree = StagedTree::default();
    for entry in WalkDir::new(staging).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", staging.display()))?;
        let relative = entry
            .path()
            .strip_prefix(staging)
            .map_err(|_| anyhow!("{} escaped the staging directory", entry.path().display()))?
            .to_path_buf();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let mut children = fs::read_dir(entry.path())
                .with_context(|| format!("failed to read {}", entry.path().display()))?;
            if children.next().is_none() {
                tree.empty_dirs.push(relative);
            }
        } else if file_type.is_symlink() {
            if !allow_symlinks {
                bail!("unsupported extracted symlink {:?}", entry.path());
            }
            tree.files.push(relative);
        } else if file_type.is_file() {
            tree.files.push(relative);
        } else {
            bail!("unsupported extracted file type {:?}", entry.path());
        }
    }
    tree.files.sort();
    tree.empty_dirs.sort();
    Ok(tree)
}

/// Safe-move every staged file to the same relative path under `dest_root` and recreate
/// empty directories. Returns the number of files moved.
pub(crate) fn relocate<T: Toolkit + ?Sized>(
    toolkit: &T,
    staging: &Path,
    dest_root: &Path,
    allow_symlinks: bool,
) -> Result<usize> {
    let tree = collect_staged(staging, allow_symlinks)?;

    for relative in &tree.files {
        let src = staging.join(relative);
        let dst = dest_root.join(relative);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let moved = toolkit
            .safe_move(&src, &dst)
            .with_context(|| format!("failed to move {} to {}", src.display(), dst.display()))?;
        if moved != dst {
            log::debug!("{:?} already exists, moved to {:?} instead", dst, moved);
        }
    }

    for relative in &tree.empty_dirs {
        let dir = dest_root.join(relative);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(tree.files.len())
}
