use thiserror::Error;

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_TIMEOUT: i32 = 124;
pub const EXIT_INTERRUPTED: i32 = 130;

/// Failures that decide the process exit code. Anything else surfacing from a
/// command is reported and exits with `EXIT_FAILURE`.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid value: {0}")]
    Validation(String),

    #[error("command failed with exit code {0}")]
    CommandFailed(i32),

    #[error("command timed out after {0}s")]
    TimedOut(u64),

    #[error("interrupted")]
    Interrupted,
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Validation(_) => EXIT_FAILURE,
            CliError::CommandFailed(code) => *code,
            CliError::TimedOut(_) => EXIT_TIMEOUT,
            CliError::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>()
        .map(CliError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code_for(&CliError::Config("x".into()).into()), 1);
        assert_eq!(exit_code_for(&CliError::CommandFailed(3).into()), 3);
        assert_eq!(exit_code_for(&CliError::TimedOut(1).into()), 124);
        assert_eq!(exit_code_for(&CliError::Interrupted.into()), 130);
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
    }
}
