//! Error taxonomy for the resilver benchmark.
//!
//! Errors are split by how the orchestration engine must react to them:
//! transient parse failures are retried, stalled generators degrade to absent
//! samples (and never surface here), idempotent administrative failures are
//! retried in a bounded loop, and everything else aborts the run.

use std::time::Duration;

/// Failure to turn a raw pool status report into a typed snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The report was torn or incomplete (for example read mid-update at 100%).
    /// Retrying after a short delay is expected to succeed.
    #[error("transient status parse failure: {0}")]
    Transient(String),

    /// The report does not match any known grammar (unrecognized redundancy family).
    /// Retrying cannot help; this is a configuration or tool-version problem.
    #[error("unrecognized status report: {0}")]
    Structural(String),
}

impl ParseError {
    /// Returns true if a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ParseError::Transient(_))
    }
}

/// Failure of an external pool administrative command.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("command `{command}` failed with exit code {exit_code:?}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("unexpected output from `{command}`: {output}")]
    UnexpectedOutput { command: String, output: String },
}

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Admin(#[from] AdminError),

    /// The engine's model of the pool diverged from the pool's real state.
    #[error("lifecycle invariant violated: {0}")]
    LifecycleInvariant(String),

    #[error("load generator error: {0}")]
    Generator(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the run must be aborted.
    ///
    /// Only transient parse failures are recoverable at this level; retry loops
    /// for idempotent administrative commands absorb their own failures before
    /// an error ever reaches the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Parse(p) if p.is_transient())
    }
}

/// Result alias using the crate-wide [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_parse_error_is_not_fatal() {
        let err = Error::from(ParseError::Transient("torn report".into()));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_structural_parse_error_is_fatal() {
        let err = Error::from(ParseError::Structural("no redundancy keyword".into()));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invariant_violation_is_fatal() {
        let err = Error::LifecycleInvariant("healthy while faulted".into());
        assert!(err.is_fatal());
        assert!(err.to_string().contains("healthy while faulted"));
    }

    #[test]
    fn test_command_failure_message() {
        let err = AdminError::CommandFailed {
            command: "zpool create tank".into(),
            exit_code: Some(1),
            stderr: "no such device".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("zpool create tank"));
        assert!(msg.contains("no such device"));
    }
}
