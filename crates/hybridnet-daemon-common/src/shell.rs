//! Command execution utilities for the node daemons.
//!
//! Commands are spawned directly with an argument vector, never through a
//! shell. [`shellquote`] is only used to render a copy-pasteable form of the
//! command for logs and error messages.
//!
//! # Example
//!
//! ```ignore
//! use hybridnet_daemon_common::shell::{self, IP_CMD};
//!
//! let out = shell::run_or_fail(IP_CMD, &["-j", "-4", "rule", "show"]).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{HostError, HostResult};

/// Path to the `ip` command for link, route and rule configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// Characters that need escaping inside double quotes: $, `, ", \ and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Characters that never need quoting.
static SHELL_SAFE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_./:=@%+,-]+$").expect("Invalid regex pattern"));

/// Quotes a string for safe use in a shell command line.
///
/// ```
/// use hybridnet_daemon_common::shell::shellquote;
///
/// assert_eq!(shellquote("simple"), "\"simple\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Renders a program and its arguments as a single command line, quoting
/// only the arguments that need it.
pub fn render(program: &str, args: &[&str]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        if SHELL_SAFE_RE.is_match(arg) {
            line.push_str(arg);
        } else {
            line.push_str(&shellquote(arg));
        }
    }
    line
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs a program with arguments and captures its output.
///
/// A non-zero exit is not an error here; see [`run_or_fail`].
pub async fn run(program: &str, args: &[&str]) -> HostResult<ExecResult> {
    let line = render(program, args);
    tracing::debug!(command = %line, "Executing command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| HostError::ShellExec {
            command: line.clone(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %line, "Command succeeded");
    } else {
        tracing::warn!(
            command = %line,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Runs a program and returns its stdout, failing on non-zero exit.
pub async fn run_or_fail(program: &str, args: &[&str]) -> HostResult<String> {
    let result = run(program, args).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(HostError::ShellCommandFailed {
            command: render(program, args),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote() {
        assert_eq!(shellquote("eth0"), "\"eth0\"");
        assert_eq!(shellquote("a\"b"), "\"a\\\"b\"");
        assert_eq!(shellquote("`x`"), "\"\\`x\\`\"");
    }

    #[test]
    fn test_render_quotes_only_when_needed() {
        assert_eq!(
            render(IP_CMD, &["-4", "route", "replace", "10.0.0.0/24", "dev", "eth0.100"]),
            "/sbin/ip -4 route replace 10.0.0.0/24 dev eth0.100"
        );
        assert_eq!(render("echo", &["a b"]), "echo \"a b\"");
    }

    #[test]
    fn test_combined_output() {
        let r = ExecResult {
            exit_code: 1,
            stdout: "out".into(),
            stderr: "err".into(),
        };
        assert_eq!(r.combined_output(), "out\nerr");
        assert!(!r.success());
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let err = run("/nonexistent/program", &[]).await.unwrap_err();
        assert!(matches!(err, HostError::ShellExec { .. }));
    }
}
