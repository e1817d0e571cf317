//! CLI smoke tests covering argument handling and exit codes.

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn empty_directory_succeeds() -> anyhow::Result<()> {
    let temp = tempdir()?;
    cargo_bin_cmd!("unrarall")
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("no rar files extracted"));
    Ok(())
}

#[test]
fn quiet_prints_nothing() -> anyhow::Result<()> {
    let temp = tempdir()?;
    cargo_bin_cmd!("unrarall")
        .args(["-q", "-v"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty());
    Ok(())
}

#[test]
fn log_file_receives_output() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let scan = temp.path().join("scan");
    fs::create_dir(&scan)?;
    let log = temp.path().join("run.log");
    cargo_bin_cmd!("unrarall")
        .arg("--log-file")
        .arg(&log)
        .arg(&scan)
        .assert()
        .success();
    assert!(fs::read_to_string(&log)?.contains("no rar files extracted"));
    Ok(())
}

#[test]
fn missing_directory_is_a_usage_error() -> anyhow::Result<()> {
    let temp = tempdir()?;
    cargo_bin_cmd!("unrarall")
        .arg(temp.path().join("does-not-exist"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not accessible"));
    Ok(())
}

#[test]
fn output_must_be_a_directory() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let file = temp.path().join("plain.txt");
    fs::write(&file, b"x")?;
    cargo_bin_cmd!("unrarall")
        .arg("--output")
        .arg(&file)
        .arg(temp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("is not a directory"));
    Ok(())
}

#[test]
fn exclusive_clean_tokens_are_rejected() {
    for spec in ["--clean=none,nfo", "--clean=all,nfo", "--clean=bogus"] {
        cargo_bin_cmd!("unrarall")
            .args([spec, "."])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("--clean"));
    }
}

#[test]
fn help_lists_clean_hooks() {
    cargo_bin_cmd!("unrarall")
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("osx_junk")
                .and(predicate::str::contains("empty_folders"))
                .and(predicate::str::contains("--allow-symlinks")),
        );
}

#[test]
fn version_is_printed() {
    cargo_bin_cmd!("unrarall")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("unrarall "));
}

#[test]
fn invalid_archive_fails_the_run() -> anyhow::Result<()> {
    let temp = tempdir()?;
    fs::write(temp.path().join("fake.rar"), b"not a rar")?;
    cargo_bin_cmd!("unrarall")
        .arg("--allow-failures")
        .arg(temp.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not appear to be a valid rar file"))
        .stderr(predicate::str::contains("1 failure(s)"));
    Ok(())
}

#[test]
fn dry_run_leaves_tree_untouched() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let archive = temp.path().join("show.rar");
    fs::write(&archive, [b"Rar!\x1a\x07\x01\x00".as_slice(), b"body".as_slice()].concat())?;
    cargo_bin_cmd!("unrarall")
        .args(["--dry", "--clean=all"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry-run: would extract"));
    assert!(archive.exists());
    assert_eq!(fs::read_dir(temp.path())?.count(), 1);
    Ok(())
}
