//! Child process execution for hook ops, provisioners and expectation checks
//!
//! Two modes: `wait` captures stdout/stderr, `interactive` inherits the
//! parent's stdio so the child can stream directly to the terminal.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{CdfError, Result};

/// Split a command string into argv the way a shell would
///
/// List-typed op args pass through unchanged; string args go through here.
pub fn split_args(input: &str) -> Result<Vec<String>> {
    shlex::split(input).ok_or_else(|| CdfError::CommandFailed {
        message: format!("unbalanced quoting in command '{input}'"),
    })
}

/// Run a command and return `(stdout, stderr)`
///
/// A nonzero exit is an error carrying whatever output the child produced.
/// In interactive mode output is not captured and both strings come back
/// empty.
pub fn run_command(
    bin: &str,
    args: &[String],
    interactive: bool,
    cwd: Option<&Path>,
) -> Result<(String, String)> {
    run_command_env(bin, args, interactive, cwd, &[])
}

/// Like [`run_command`], with extra environment variables for the child
pub fn run_command_env(
    bin: &str,
    args: &[String],
    interactive: bool,
    cwd: Option<&Path>,
    envs: &[(String, String)],
) -> Result<(String, String)> {
    let mut command = Command::new(bin);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    for (key, value) in envs {
        command.env(key, value);
    }

    if interactive {
        let status = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| CdfError::CommandFailed {
                message: format!("{bin}: {e}"),
            })?;
        if !status.success() {
            return Err(CdfError::CommandFailed {
                message: format!("'{bin}' exited with {status}"),
            });
        }
        return Ok((String::new(), String::new()));
    }

    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| CdfError::CommandFailed {
            message: format!("{bin}: {e}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let mut message = format!("'{bin}' exited with {}", output.status);
        if !stdout.is_empty() {
            message = format!("{message} stdout:{stdout}");
        }
        if !stderr.is_empty() {
            message = format!("{message} stderr:{stderr}");
        }
        return Err(CdfError::CommandFailed { message });
    }

    Ok((stdout, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_args_respects_quotes() {
        let args = split_args("echo 'hello world' plain").unwrap();
        assert_eq!(args, vec!["echo", "hello world", "plain"]);
    }

    #[test]
    fn test_split_args_unbalanced_quote_fails() {
        assert!(split_args("echo 'oops").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_captures_stdout() {
        let (stdout, stderr) =
            run_command("echo", &["hi".to_string()], false, None).unwrap();
        assert_eq!(stdout.trim(), "hi");
        assert!(stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_nonzero_exit_is_error() {
        let err = run_command("false", &[], false, None).unwrap_err();
        assert!(matches!(err, CdfError::CommandFailed { .. }));
    }

    #[test]
    fn test_run_command_missing_binary_is_error() {
        let err = run_command("definitely-not-a-binary-xyz", &[], false, None).unwrap_err();
        assert!(matches!(err, CdfError::CommandFailed { .. }));
    }
}
