//! Command-line interface definitions for unrarall.
use std::path::PathBuf;

use clap::{Parser, ValueHint};

use crate::app::DEFAULT_DEPTH;
use crate::decode::DEFAULT_MAX_DICTIONARY_BYTES;
use crate::hooks::{self, SelectionError};

const CLI_EXAMPLES: &str = "Examples:\n  unrarall ~/Downloads\n  unrarall --clean=all --full-path -o /srv/media ~/Downloads\n  unrarall --dry -v --depth 2 .\n";

/// Top-level CLI parser.
#[derive(Debug, Parser)]
#[command(
    name = "unrarall",
    version,
    about = "Find, verify and safely extract RAR archives below a directory",
    long_about = "Scans a directory tree for first-volume RAR archives, checks their SFV \
                  sidecars, extracts them through a staging directory with path-safety \
                  checks, and optionally tidies up afterwards.",
    after_help = help_footer(),
    arg_required_else_help = true
)]
pub struct Cli {
    /// Directory to scan for archives.
    #[arg(value_name = "DIRECTORY", value_hint = ValueHint::DirPath)]
    pub directory: PathBuf,
    /// Enable verbose logging (ignored when --quiet is set).
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
    /// Suppress all output.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
    /// Log what would happen without writing anything.
    #[arg(short = 'd', long = "dry")]
    pub dry_run: bool,
    /// Continue past SFV failures and run clean hooks after failed extractions.
    #[arg(short = 'f', long = "force")]
    pub force: bool,
    /// Exit successfully when at least one archive was extracted.
    #[arg(long = "allow-failures")]
    pub allow_failures: bool,
    /// Skip verification of <stem>.sfv files.
    #[arg(short = 's', long = "disable-cksfv")]
    pub disable_cksfv: bool,
    /// Clean hooks to run: none, all, or a comma-separated list.
    #[arg(
        long = "clean",
        value_name = "SPEC",
        default_value = hooks::NONE,
        value_parser = parse_clean_spec
    )]
    pub clean: CleanSpec,
    /// Preserve directory structure stored in archives.
    #[arg(long = "full-path")]
    pub full_path: bool,
    /// Extract symlink entries whose targets stay inside the output.
    #[arg(long = "allow-symlinks")]
    pub allow_symlinks: bool,
    /// Extract into this existing directory instead of next to each archive.
    #[arg(short = 'o', long = "output", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub output: Option<PathBuf>,
    /// Append all output to FILE as well.
    #[arg(long = "log-file", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,
    /// Depth budget for the scan and for nested archives.
    #[arg(long = "depth", value_name = "N", default_value_t = DEFAULT_DEPTH)]
    pub depth: u32,
    /// Skip archives whose files already exist at the destination.
    #[arg(long = "skip-if-exists")]
    pub skip_if_exists: bool,
    /// Newline-separated passwords to try on encrypted archives [default: ~/.unrar_passwords].
    #[arg(long = "password-file", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub password_file: Option<PathBuf>,
    /// Largest decoder dictionary to allow, in bytes.
    #[arg(
        long = "max-dict",
        value_name = "BYTES",
        default_value_t = DEFAULT_MAX_DICTIONARY_BYTES,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub max_dict: u64,
}

/// Parsed `--clean` selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanSpec(pub Vec<String>);

fn parse_clean_spec(raw: &str) -> Result<CleanSpec, SelectionError> {
    hooks::parse_selection(raw).map(CleanSpec)
}

fn help_footer() -> String {
    format!("{}\n{CLI_EXAMPLES}", hooks::help_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_apply() {
        let cli = Cli::try_parse_from(["unrarall", "."]).expect("parse");
        assert_eq!(cli.depth, 4);
        assert_eq!(cli.max_dict, 1 << 30);
        assert_eq!(cli.clean, CleanSpec(vec!["none".into()]));
        assert!(!cli.disable_cksfv && !cli.dry_run);
    }

    #[test]
    fn clean_spec_is_validated() {
        let cli = Cli::try_parse_from(["unrarall", "--clean", "NFO,rar", "."]).expect("parse");
        assert_eq!(cli.clean, CleanSpec(vec!["nfo".into(), "rar".into()]));
        for spec in ["none,nfo", "all,nfo", "bogus", ""] {
            assert!(
                Cli::try_parse_from(["unrarall", "--clean", spec, "."]).is_err(),
                "{spec:?}"
            );
        }
    }

    #[test]
    fn numeric_limits_are_enforced() {
        assert!(Cli::try_parse_from(["unrarall", "--max-dict", "0", "."]).is_err());
        assert!(Cli::try_parse_from(["unrarall", "--depth", "-1", "."]).is_err());
        let cli = Cli::try_parse_from(["unrarall", "-vqdfs", "--depth", "0", "."]).expect("parse");
        assert!(cli.verbose && cli.quiet && cli.dry_run && cli.force && cli.disable_cksfv);
        assert_eq!(cli.depth, 0);
    }
}
