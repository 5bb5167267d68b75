//! CLI error handling

use std::fmt;

use rbk_errors::UserFacingError;

/// CLI-specific error type
#[derive(Debug)]
pub enum CliError {
    /// Error from the rollback engine crates
    Rbk(rbk_errors::Error),
    /// `verify` found problems
    Unhealthy(usize),
    /// I/O error while writing output
    Io(std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Rbk(e) => match e.user_code() {
                Some(code) if code.starts_with("config.") => 78,
                Some(code) if code.starts_with("storage.") => 74,
                Some("rollback.not_found") => 3,
                _ if e.is_retryable() => 75,
                _ => 1,
            },
            CliError::Unhealthy(_) => 2,
            CliError::Io(_) => 74,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Rbk(e) => {
                let message = e.user_message();
                write!(f, "{message}")?;
                if let Some(code) = e.user_code() {
                    write!(f, "\n  Code: {code}")?;
                }
                if let Some(hint) = e.user_hint() {
                    write!(f, "\n  Hint: {hint}")?;
                }
                Ok(())
            }
            CliError::Unhealthy(count) => write!(f, "verification found {count} problem(s)"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Rbk(e) => Some(e),
            CliError::Io(e) => Some(e),
            CliError::Unhealthy(_) => None,
        }
    }
}

impl From<rbk_errors::Error> for CliError {
    fn from(e: rbk_errors::Error) -> Self {
        CliError::Rbk(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbk_errors::{ConfigError, RollbackError};

    #[test]
    fn test_exit_codes() {
        let config: CliError = rbk_errors::Error::from(ConfigError::Invalid {
            message: "zero lifetime".into(),
        })
        .into();
        assert_eq!(config.exit_code(), 78);

        let missing: CliError = rbk_errors::Error::from(RollbackError::NotFound { id: 9 }).into();
        assert_eq!(missing.exit_code(), 3);
        assert!(missing.to_string().contains("Code: rollback.not_found"));

        assert_eq!(CliError::Unhealthy(1).exit_code(), 2);
    }
}
