//! Filesystem primitives used to move staged output into place.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tempfile::TempDir;

/// Prefix of per-candidate staging directories.
pub const STAGING_PREFIX: &str = ".unrarall-";

const COPY_BUFFER_BYTES: usize = 256 * 1024;

/// Create a uniquely named hidden staging directory under `parent`.
pub fn create_staging_dir(parent: &Path) -> io::Result<TempDir> {
    tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)
}

/// Stop `dir` from being deleted on drop and return its path.
pub fn keep_staging_dir(dir: TempDir) -> PathBuf {
    dir.keep()
}

/// Move `src` to `dst`, or to the first free `dst.N` when `dst` is taken.
///
/// Returns the path actually written. Renames across filesystems fall back to a copy
/// followed by removal of the source.
pub fn safe_move(src: &Path, dst: &Path) -> io::Result<PathBuf> {
    safe_move_with(src, dst, |from, to| fs::rename(from, to))
}

fn safe_move_with<F>(src: &Path, dst: &Path, mut rename: F) -> io::Result<PathBuf>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    fs::symlink_metadata(src)?;

    for attempt in 0_u64.. {
        let candidate = if attempt == 0 {
            dst.to_path_buf()
        } else {
            numbered(dst, attempt)
        };

        match fs::symlink_metadata(&candidate) {
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        match rename(src, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                log::debug!(
                    "Rename of {} crosses devices, copying instead",
                    src.display()
                );
                copy_path(src, &candidate)?;
                remove_path(src)?;
                return Ok(candidate);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    unreachable!("suffix space exhausted")
}

fn numbered(path: &Path, attempt: u64) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{attempt}"));
    PathBuf::from(name)
}

fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn copy_path(src: &Path, dst: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(src)?;
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        copy_symlink(src, dst)
    } else if file_type.is_dir() {
        copy_dir(src, dst, &metadata).inspect_err(|_| {
            let _ = fs::remove_dir_all(dst);
        })
    } else if file_type.is_file() {
        copy_file(src, dst, &metadata)
    } else {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported file type at {}", src.display()),
        ))
    }
}

fn copy_dir(src: &Path, dst: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    fs::create_dir(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        copy_path(&entry.path(), &dst.join(entry.file_name()))?;
    }
    fs::set_permissions(dst, metadata.permissions())?;
    let _ = filetime::set_file_mtime(dst, FileTime::from_last_modification_time(metadata));
    Ok(())
}

fn copy_file(src: &Path, dst: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    let result = write_copy(src, dst);
    if result.is_err() {
        let _ = fs::remove_file(dst);
        return result;
    }
    fs::set_permissions(dst, metadata.permissions())?;
    let _ = filetime::set_file_mtime(dst, FileTime::from_last_modification_time(metadata));
    Ok(())
}

fn write_copy(src: &Path, dst: &Path) -> io::Result<()> {
    let mut reader = BufReader::with_capacity(COPY_BUFFER_BYTES, File::open(src)?);
    let out = OpenOptions::new().write(true).create_new(true).open(dst)?;
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_BYTES, out);
    io::copy(&mut reader, &mut writer)?;
    let out = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    out.sync_all()
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(windows)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    if fs::metadata(src).is_ok_and(|meta| meta.is_dir()) {
        std::os::windows::fs::symlink_dir(target, dst)
    } else {
        std::os::windows::fs::symlink_file(target, dst)
    }
}
