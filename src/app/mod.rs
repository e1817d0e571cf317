//! Run orchestration: scan, validate, verify, extract, recurse, relocate, clean.
//!
//! Each candidate is handled on its own. Problems with one archive are logged and
//! counted in [`RunStats::failures`]; only environment failures (scanning, staging,
//! relocation) abort the run.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tempfile::TempDir;

use crate::archive::{self, ExtractError, ExtractionOutcome};
use crate::decode::{ArchiveDecoder, ExtractionSettings, DEFAULT_MAX_DICTIONARY_BYTES};
use crate::finder::{self, Candidate};
use crate::fsops;
use crate::hooks::{self, CleanupContext, HookRunError};
use crate::sfv::{self, VerifyError};

mod relocate;

/// Default depth budget for scanning and nested extraction.
pub const DEFAULT_DEPTH: u32 = 4;

/// Validated settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub directory: PathBuf,
    /// Bounds both the scan below `directory` and how many archive layers are unpacked.
    pub depth: u32,
    pub full_path: bool,
    pub allow_symlinks: bool,
    pub force: bool,
    pub dry_run: bool,
    pub skip_if_exists: bool,
    pub verify_sfv: bool,
    /// Extraction destination; each archive's own directory when unset.
    pub output_dir: Option<PathBuf>,
    pub password_file: Option<PathBuf>,
    pub max_dictionary_bytes: u64,
    pub clean_hooks: Vec<String>,
    pub allow_failures: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            depth: DEFAULT_DEPTH,
            full_path: false,
            allow_symlinks: false,
            force: false,
            dry_run: false,
            skip_if_exists: false,
            verify_sfv: true,
            output_dir: None,
            password_file: None,
            max_dictionary_bytes: DEFAULT_MAX_DICTIONARY_BYTES,
            clean_hooks: vec![hooks::NONE.to_owned()],
            allow_failures: false,
        }
    }
}

/// Outcome counters, summed over candidates and nested runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub found: u64,
    pub extracted: u64,
    pub skipped: u64,
    pub failures: u64,
}

impl RunStats {
    pub fn add(&mut self, other: RunStats) {
        self.found += other.found;
        self.extracted += other.extracted;
        self.skipped += other.skipped;
        self.failures += other.failures;
    }

    /// Failures are tolerated only with `allow_failures` and at least one extraction.
    #[must_use]
    pub fn succeeded(&self, allow_failures: bool) -> bool {
        self.failures == 0 || (allow_failures && self.extracted > 0)
    }

    #[must_use]
    pub fn exit_code(&self, allow_failures: bool) -> i32 {
        if self.succeeded(allow_failures) {
            0
        } else {
            1
        }
    }
}

/// Collaborators the orchestrator calls out to.
///
/// Provided methods use the real filesystem implementations; an implementation only has
/// to supply archive access.
pub trait Toolkit {
    fn scan(&self, root: &Path, max_depth: Option<u32>) -> io::Result<Vec<Candidate>> {
        finder::scan(root, max_depth)
    }

    fn has_signature(&self, path: &Path) -> io::Result<bool> {
        archive::has_archive_signature(path)
    }

    fn verify_sfv(&self, dir: &Path, stem: &str) -> Result<(), VerifyError> {
        sfv::verify_sidecar(dir, stem)
    }

    fn create_staging_dir(&self, parent: &Path) -> io::Result<TempDir> {
        fsops::create_staging_dir(parent)
    }

    fn extract(
        &self,
        archive: &Path,
        staging: &Path,
        full_path: bool,
        settings: &ExtractionSettings,
        password_file: Option<&Path>,
    ) -> Result<ExtractionOutcome, ExtractError>;

    fn already_extracted(
        &self,
        archive: &Path,
        dest_root: &Path,
        full_path: bool,
        settings: &ExtractionSettings,
    ) -> Result<bool, ExtractError>;

    fn safe_move(&self, src: &Path, dst: &Path) -> io::Result<PathBuf> {
        fsops::safe_move(src, dst)
    }

    fn run_hooks(&self, selection: &[String], ctx: &CleanupContext) -> Result<(), HookRunError> {
        hooks::run_selected(selection, ctx)
    }
}

/// [`Toolkit`] over a concrete archive decoder.
#[derive(Debug, Clone, Default)]
pub struct Standard<D> {
    decoder: D,
}

impl<D: ArchiveDecoder> Standard<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }
}

impl<D: ArchiveDecoder> Toolkit for Standard<D> {
    fn extract(
        &self,
        archive: &Path,
        staging: &Path,
        full_path: bool,
        settings: &ExtractionSettings,
        password_file: Option<&Path>,
    ) -> Result<ExtractionOutcome, ExtractError> {
        archive::extract_with_passwords(
            &self.decoder,
            archive,
            staging,
            full_path,
            settings,
            password_file,
        )
    }

    fn already_extracted(
        &self,
        archive: &Path,
        dest_root: &Path,
        full_path: bool,
        settings: &ExtractionSettings,
    ) -> Result<bool, ExtractError> {
        archive::already_extracted(&self.decoder, archive, dest_root, full_path, settings)
    }
}

/// Drives a run over [`RunOptions::directory`].
pub struct Orchestrator<T> {
    toolkit: T,
    options: RunOptions,
}

impl<T: Toolkit> Orchestrator<T> {
    pub fn new(toolkit: T, options: RunOptions) -> Self {
        Self { toolkit, options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Process the configured directory and log a summary.
    pub fn run(&self) -> Result<RunStats> {
        let stats = self.run_directory(&self.options.directory, self.options.depth)?;
        self.log_summary(&stats);
        Ok(stats)
    }

    /// Process every candidate below `dir` with `depth` levels of budget left.
    pub fn run_directory(&self, dir: &Path, depth: u32) -> Result<RunStats> {
        let candidates = self
            .toolkit
            .scan(dir, Some(depth))
            .with_context(|| format!("failed to scan {}", dir.display()))?;

        let mut stats = RunStats::default();
        for candidate in &candidates {
            stats.add(self.process_candidate(candidate, depth)?);
        }
        Ok(stats)
    }

    /// Take one candidate through validation, extraction and cleanup.
    pub fn process_candidate(&self, candidate: &Candidate, depth: u32) -> Result<RunStats> {
        let options = &self.options;
        let archive = candidate.path.as_path();
        let mut stats = RunStats {
            found: 1,
            ..RunStats::default()
        };

        match self.toolkit.has_signature(archive) {
            Ok(true) => {}
            Ok(false) => {
                log::error!(
                    "Skipping file {archive:?} because it does not appear to be a valid rar file."
                );
                stats.failures += 1;
                return Ok(stats);
            }
            Err(err) => {
                log::error!("Failed to inspect archive {archive:?}: {err}");
                stats.failures += 1;
                return Ok(stats);
            }
        }

        let archive_dir = candidate.dir();
        let dest_root = options.output_dir.as_deref().unwrap_or(archive_dir);
        let settings = ExtractionSettings {
            max_dictionary_bytes: options.max_dictionary_bytes,
            password: None,
            allow_symlinks: options.allow_symlinks,
        };

        let mut sfv_failed = false;
        if options.verify_sfv {
            if let Err(err) = self.toolkit.verify_sfv(archive_dir, &candidate.stem) {
                let err = anyhow::Error::new(err);
                if !options.force {
                    log::error!("SFV verification failed for {archive:?}: {err:#}");
                    stats.failures += 1;
                    return Ok(stats);
                }
                log::error!(
                    "SFV verification failed for {archive:?}, continuing due to --force: {err:#}"
                );
                sfv_failed = true;
            }
        }

        if options.skip_if_exists && !options.force && !sfv_failed && !options.dry_run {
            match self
                .toolkit
                .already_extracted(archive, dest_root, options.full_path, &settings)
            {
                Ok(true) => {
                    log::info!(
                        "File {archive:?} appears to have already been extracted, skipping."
                    );
                    stats.skipped += 1;
                    return Ok(stats);
                }
                Ok(false) => {}
                Err(err) => log::debug!(
                    "Skip-if-exists check failed for {archive:?}: {:#}",
                    anyhow::Error::new(err)
                ),
            }
        }

        let hooks_active = hooks::is_active(&options.clean_hooks);
        let cleanup = |dry_run| CleanupContext {
            extraction_root: dest_root.to_path_buf(),
            archive_dir: archive_dir.to_path_buf(),
            stem: candidate.stem.clone(),
            dry_run,
        };

        if options.dry_run {
            log::info!("Dry-run: would extract {archive:?} to {dest_root:?}");
            if hooks_active {
                if let Err(err) = self.toolkit.run_hooks(&options.clean_hooks, &cleanup(true)) {
                    log::error!("Cleanup hooks failed for {archive:?}: {err}");
                    stats.failures += 1;
                    return Ok(stats);
                }
            }
            stats.extracted += 1;
            return Ok(stats);
        }

        let staging = self
            .toolkit
            .create_staging_dir(archive_dir)
            .with_context(|| format!("failed to create staging directory for {archive:?}"))?;

        let mut outcome = self.extract_into(archive, staging.path(), &settings);
        if outcome.is_ok() {
            if let Some(nested_depth) = depth.checked_sub(1) {
                match self.run_directory(staging.path(), nested_depth) {
                    Ok(nested) => {
                        stats.add(nested);
                        if !nested.succeeded(options.allow_failures) {
                            outcome = Err(anyhow!("nested extraction run failed"));
                        }
                    }
                    Err(err) => outcome = Err(err.context("nested extraction run failed")),
                }
            }
        }

        if let Err(err) =
            relocate::relocate(&self.toolkit, staging.path(), dest_root, options.allow_symlinks)
        {
            let kept = fsops::keep_staging_dir(staging);
            return Err(err.context(format!(
                "failed to move extracted files for {archive:?}, staged output left in {kept:?}"
            )));
        }
        let staging_path = staging.path().to_path_buf();
        staging
            .close()
            .with_context(|| format!("failed to remove staging directory {staging_path:?}"))?;

        if hooks_active {
            if outcome.is_ok() || options.force {
                if let Err(err) = self.toolkit.run_hooks(&options.clean_hooks, &cleanup(false)) {
                    log::error!("Cleanup hooks failed for {archive:?}: {err}");
                    if outcome.is_ok() {
                        outcome = Err(err.into());
                    }
                }
            } else {
                log::error!(
                    "Couldn't run cleanup hooks for {archive:?} because extraction failed. Use --force to override."
                );
            }
        }

        match outcome {
            Ok(()) => stats.extracted += 1,
            Err(err) => {
                log::error!("Extraction failed for {archive:?}: {err:#}");
                stats.failures += 1;
            }
        }
        Ok(stats)
    }

    fn extract_into(
        &self,
        archive: &Path,
        staging: &Path,
        settings: &ExtractionSettings,
    ) -> Result<()> {
        let ExtractionOutcome {
            volumes,
            used_password,
            password,
        } = self.toolkit.extract(
            archive,
            staging,
            self.options.full_path,
            settings,
            self.options.password_file.as_deref(),
        )?;
        if used_password {
            log::debug!(
                "Extraction of {archive:?} succeeded using password {:?}",
                password.unwrap_or_default()
            );
        }
        log::debug!("Extracted {archive:?} using volumes: {volumes:?}");
        Ok(())
    }

    fn log_summary(&self, stats: &RunStats) {
        if stats.extracted > 0 {
            if hooks::is_active(&self.options.clean_hooks) {
                log::info!("{} rar file(s) found, extracted, and cleaned.", stats.extracted);
            } else {
                log::info!("{} rar file(s) found and extracted.", stats.extracted);
            }
        } else {
            log::info!("no rar files extracted");
        }

        if stats.failures > 0 {
            log::error!("{} failure(s)", stats.failures);
            if self.options.allow_failures && stats.extracted > 0 {
                log::info!("{} success(es)", stats.extracted);
            }
        }
    }
}
