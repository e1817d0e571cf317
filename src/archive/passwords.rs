//! Password list loading.

use std::fs;
use std::io;
use std::path::Path;

/// Read newline-delimited passwords from `path`, in file order.
///
/// Blank lines are skipped and a trailing `\r` is dropped; any other whitespace is part
/// of the password.
pub fn load_passwords(path: &Path) -> io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8(bytes)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}
