//! Command-line entry point for the unrarall binary.

use clap::Parser;

use unrarall::error::{exit_code_for, UserInputError};

fn main() {
    let cli = unrarall::cli::Cli::parse();

    if let Err(err) = unrarall::logging::init(cli.quiet, cli.verbose, cli.log_file.as_deref()) {
        eprintln!("unrarall: {err:#}");
        std::process::exit(unrarall::error::EXIT_USER_INPUT);
    }

    let code = match unrarall::run(&cli) {
        Ok(stats) => stats.exit_code(cli.allow_failures),
        Err(err) => {
            if err.chain().any(|cause| cause.is::<UserInputError>()) {
                eprintln!("unrarall: {err:#}");
            } else {
                log::error!("Run failed: {err:#}");
            }
            exit_code_for(&err)
        }
    };
    log::logger().flush();
    std::process::exit(code);
}
