//! Simple File Verification (`.sfv`) parsing and CRC-32 checks.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};

use thiserror::Error;

/// One `name checksum` line of an SFV manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfvEntry {
    pub name: String,
    pub crc: u32,
}

/// A checksum that did not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub name: String,
    pub expected: u32,
    pub actual: u32,
}

/// Every problem found while verifying a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub missing: Vec<String>,
    pub mismatches: Vec<Mismatch>,
}

impl VerificationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.mismatches.is_empty()
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sfv verification failed: {} missing, {} mismatched",
            self.missing.len(),
            self.mismatches.len()
        )
    }
}

/// Malformed SFV content.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("sfv line {line}: {reason}")]
pub struct SfvParseError {
    pub line: usize,
    pub reason: LineError,
}

/// Why a data line was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("invalid crc field")]
    InvalidCrc,
    #[error("missing separator before crc")]
    MissingSeparator,
    #[error("missing filename")]
    MissingName,
}

/// Verification failures.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Parse(#[from] SfvParseError),
    #[error("failed to read {}", path.display())]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("verify {name:?}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Failed(VerificationReport),
}

/// Parse SFV text into entries, in file order.
pub fn parse(text: &str) -> Result<Vec<SfvEntry>, SfvParseError> {
    let mut entries = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }
        let entry = parse_line(line).map_err(|reason| SfvParseError {
            line: index + 1,
            reason,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_line(line: &str) -> Result<SfvEntry, LineError> {
    let body = line.trim_end();
    let digits = body
        .bytes()
        .rev()
        .take_while(u8::is_ascii_hexdigit)
        .count();
    if digits != 8 {
        return Err(LineError::InvalidCrc);
    }

    let (head, crc) = body.split_at(body.len() - digits);
    if !head.ends_with(|c: char| c.is_whitespace()) {
        return Err(LineError::MissingSeparator);
    }
    let name = head.trim();
    if name.is_empty() {
        return Err(LineError::MissingName);
    }
    let crc = u32::from_str_radix(crc, 16).map_err(|_| LineError::InvalidCrc)?;
    Ok(SfvEntry {
        name: name.to_owned(),
        crc,
    })
}

/// Check every entry against the files under `base_dir`.
///
/// Missing files and mismatches are collected into a single [`VerifyError::Failed`];
/// any other I/O failure stops verification at the offending entry.
pub fn verify(base_dir: &Path, entries: &[SfvEntry]) -> Result<(), VerifyError> {
    let mut report = VerificationReport::default();
    for entry in entries {
        let target = base_dir.join(entry.name.replace('\\', MAIN_SEPARATOR_STR));
        match file_crc32(&target) {
            Ok(actual) if actual == entry.crc => {}
            Ok(actual) => report.mismatches.push(Mismatch {
                name: entry.name.clone(),
                expected: entry.crc,
                actual,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                report.missing.push(entry.name.clone());
            }
            Err(source) => {
                return Err(VerifyError::Io {
                    name: entry.name.clone(),
                    source,
                })
            }
        }
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(VerifyError::Failed(report))
    }
}

/// Verify `<dir>/<stem>.sfv` when it exists.
pub fn verify_sidecar(dir: &Path, stem: &str) -> Result<(), VerifyError> {
    let path = dir.join(format!("{stem}.sfv"));
    let text = match fs::read(&path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => return Err(VerifyError::ReadManifest { path, source }),
    };
    log::debug!("Verifying checksums listed in {}", path.display());
    let entries = parse(&text)?;
    verify(dir, &entries)
}

/// Streaming IEEE CRC-32 of a file.
pub fn file_crc32(path: &Path) -> io::Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize())
}
