//! SFV sidecar verification against real files.

use std::fs;

use anyhow::Result;
use tempfile::tempdir;
use unrarall::sfv::{self, file_crc32, Mismatch, VerifyError};

#[test]
fn reports_every_missing_and_mismatched_file() -> Result<()> {
    let tmp = tempdir()?;
    fs::write(tmp.path().join("set.r00"), b"volume zero")?;
    fs::write(tmp.path().join("set.r01"), b"volume one")?;
    let good = file_crc32(&tmp.path().join("set.r00"))?;
    let manifest = format!(
        "; generated by a release tool\r\nset.r00 {good:08X}\r\nset.r01 00000000\r\nset.r02 deadbeef\r\n"
    );
    fs::write(tmp.path().join("set.sfv"), manifest)?;

    let report = match sfv::verify_sidecar(tmp.path(), "set") {
        Err(VerifyError::Failed(report)) => report,
        other => panic!("expected a verification report, got {other:?}"),
    };
    assert_eq!(report.missing, ["set.r02"]);
    assert_eq!(
        report.mismatches,
        [Mismatch {
            name: "set.r01".into(),
            expected: 0,
            actual: crc32fast::hash(b"volume one"),
        }]
    );
    assert_eq!(
        report.to_string(),
        "sfv verification failed: 1 missing, 1 mismatched"
    );
    Ok(())
}

#[test]
fn absent_sidecar_is_not_an_error() -> Result<()> {
    let tmp = tempdir()?;
    sfv::verify_sidecar(tmp.path(), "nothing")?;
    Ok(())
}

#[test]
fn malformed_sidecar_names_the_line() -> Result<()> {
    let tmp = tempdir()?;
    fs::write(tmp.path().join("bad.sfv"), "bad.rar 1234abcd\nbad.r00 xyz\n")?;
    let err = sfv::verify_sidecar(tmp.path(), "bad").unwrap_err();
    assert!(matches!(err, VerifyError::Parse(ref parse) if parse.line == 2));
    assert!(err.to_string().starts_with("sfv line 2:"), "{err}");
    Ok(())
}

#[test]
fn windows_separators_resolve_into_subdirectories() -> Result<()> {
    let tmp = tempdir()?;
    fs::create_dir(tmp.path().join("cd1"))?;
    fs::write(tmp.path().join("cd1/part.rar"), b"payload")?;
    let crc = crc32fast::hash(b"payload");
    fs::write(tmp.path().join("disc.sfv"), format!("cd1\\part.rar {crc:08x}\n"))?;
    sfv::verify_sidecar(tmp.path(), "disc")?;
    Ok(())
}
