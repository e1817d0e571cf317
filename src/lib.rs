//! unrarall library entry points.

pub mod app;
pub mod archive;
pub mod cli;
pub mod decode;
pub mod error;
pub mod finder;
pub mod fsops;
pub mod hooks;
pub mod logging;
pub mod policy;
pub mod sfv;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::app::{RunOptions, RunStats};
use crate::cli::Cli;
use crate::error::UserInputError;

/// File in the home directory consulted for passwords when `--password-file` is unset.
pub const DEFAULT_PASSWORD_FILE: &str = ".unrar_passwords";

/// Execute the run described by the parsed CLI input.
pub fn run(cli: &Cli) -> Result<RunStats> {
    let options = run_options(cli)?;
    execute(options)
}

/// Validate paths and translate CLI switches into [`RunOptions`].
pub fn run_options(cli: &Cli) -> Result<RunOptions> {
    let directory = existing_dir(&cli.directory, "directory")?;
    let output_dir = cli
        .output
        .as_deref()
        .map(|path| existing_dir(path, "output directory"))
        .transpose()?;
    let password_file = cli.password_file.clone().or_else(default_password_file);

    Ok(RunOptions {
        directory,
        depth: cli.depth,
        full_path: cli.full_path,
        allow_symlinks: cli.allow_symlinks,
        force: cli.force,
        dry_run: cli.dry_run,
        skip_if_exists: cli.skip_if_exists,
        verify_sfv: !cli.disable_cksfv,
        output_dir,
        password_file,
        max_dictionary_bytes: cli.max_dict,
        clean_hooks: cli.clean.0.clone(),
        allow_failures: cli.allow_failures,
    })
}

#[cfg(feature = "unrar")]
fn execute(options: RunOptions) -> Result<RunStats> {
    use crate::app::{Orchestrator, Standard};
    use crate::decode::rar::UnrarDecoder;

    Orchestrator::new(Standard::new(UnrarDecoder), options).run()
}

#[cfg(not(feature = "unrar"))]
fn execute(_options: RunOptions) -> Result<RunStats> {
    anyhow::bail!("no archive decoder backend compiled in; rebuild with the `unrar` feature")
}

fn existing_dir(path: &Path, what: &str) -> Result<PathBuf> {
    let metadata = std::fs::metadata(path)
        .map_err(|err| UserInputError::new(format!("{what} {path:?} is not accessible: {err}")))?;
    if !metadata.is_dir() {
        return Err(UserInputError::new(format!("{what} {path:?} is not a directory")).into());
    }
    std::path::absolute(path).with_context(|| format!("failed to resolve {}", path.display()))
}

fn default_password_file() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(DEFAULT_PASSWORD_FILE))
}
