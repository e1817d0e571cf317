//! Shared error helpers for consistent exit codes.

use thiserror::Error;

/// Exit code for a fatal run error.
pub const EXIT_RUN_FAILED: i32 = 1;
/// Exit code for invalid arguments or missing paths.
pub const EXIT_USER_INPUT: i32 = 2;

/// A problem with what the user asked for (missing directory, output is a file, etc.).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UserInputError(pub String);

impl UserInputError {
    /// Convenience constructor.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Map a fatal error to the process exit code by walking its cause chain.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(|cause| cause.is::<UserInputError>()) {
        EXIT_USER_INPUT
    } else {
        EXIT_RUN_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn user_input_anywhere_in_chain_maps_to_two() {
        let err = Err::<(), _>(UserInputError::new("no such directory"))
            .context("validating arguments")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_USER_INPUT);
        assert_eq!(exit_code_for(&anyhow::anyhow!("disk on fire")), EXIT_RUN_FAILED);
    }
}
