//! Error types for host network operations.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for host network operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors that can occur while reading or changing host network state.
#[derive(Debug, Error)]
pub enum HostError {
    /// Failed to spawn a command.
    #[error("Failed to execute command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Command returned a non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Command output could not be understood.
    #[error("Failed to parse output of '{command}': {message}")]
    Parse {
        /// The command whose output was being parsed.
        command: String,
        /// Error message.
        message: String,
    },

    /// Reading a kernel setting failed.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// The file being read.
        path: String,
        #[source]
        source: io::Error,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl HostError {
    /// Creates a parse error.
    pub fn parse(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error for a file path.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HostError::ShellCommandFailed { .. } | HostError::ShellExec { .. } | HostError::Io { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_failed() {
        let err = HostError::ShellCommandFailed {
            command: "/sbin/ip link set dev eth0.100 up".to_string(),
            exit_code: 1,
            output: "Cannot find device \"eth0.100\"".to_string(),
        };
        assert!(err.to_string().contains("link set dev"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_parse_error() {
        let err = HostError::parse("ip -j route show", "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Failed to parse output of 'ip -j route show': expected value at line 1"
        );
    }

    #[test]
    fn test_is_retryable() {
        let failed = HostError::ShellCommandFailed {
            command: "x".into(),
            exit_code: 2,
            output: String::new(),
        };
        assert!(failed.is_retryable());
        assert!(!HostError::parse("x", "y").is_retryable());
        assert!(!HostError::internal("bug").is_retryable());
    }
}
