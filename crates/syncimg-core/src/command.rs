//! Running operator-supplied commands.
//!
//! The engine only sees [`CommandRunner`]; [`ShellRunner`] is the real
//! implementation and tests substitute scripted runners.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to run {name}: {source}")]
    Spawn { name: String, source: io::Error },

    #[error("Failed to write log {}: {source}", .path.display())]
    Log { path: PathBuf, source: io::Error },

    #[error("{name} exited with {}", describe_exit(.code))]
    Failed { name: String, code: Option<i32> },
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

/// A rendered command ready to run.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    /// Human label used in logs ("check", "publish", ...).
    pub name: &'a str,
    pub script: &'a str,
    /// Where to write the combined log, if anywhere.
    pub log_path: Option<&'a Path>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last non-blank stdout line, trimmed.
    pub fn last_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|l| !l.is_empty())
    }

    /// Turn a non-zero exit into [`CommandError::Failed`].
    pub fn ensure_success(self, name: &str) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                name: name.to_string(),
                code: self.code,
            })
        }
    }
}

pub trait CommandRunner {
    /// Run to completion. A non-zero exit is not an error here; callers
    /// inspect [`CommandOutput::code`].
    fn run(&self, invocation: &Invocation<'_>) -> Result<CommandOutput, CommandError>;
}

/// Runs scripts through the system shell.
///
/// The script is written to a private temporary file. Scripts starting with
/// `#!` are executed directly so any interpreter can be used; everything else
/// goes through `/bin/sh`. There is no timeout.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: PathBuf,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
        }
    }
}

impl ShellRunner {
    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, invocation: &Invocation<'_>) -> Result<CommandOutput, CommandError> {
        let spawn_err = |source: io::Error| CommandError::Spawn {
            name: invocation.name.to_string(),
            source,
        };

        let mut script = tempfile::Builder::new()
            .prefix("syncimg-")
            .suffix(".cmd")
            .tempfile()
            .map_err(spawn_err)?;
        script
            .write_all(invocation.script.as_bytes())
            .map_err(spawn_err)?;
        // Close the handle so the file can be executed.
        let script_path = script.into_temp_path();
        make_private_executable(&script_path).map_err(spawn_err)?;

        let mut cmd = if invocation.script.starts_with("#!") {
            Command::new(&*script_path)
        } else {
            let mut c = Command::new(&self.shell);
            c.arg(&*script_path);
            c
        };

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(spawn_err)?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if let Some(log_path) = invocation.log_path {
            write_log(log_path, invocation, &result).map_err(|source| CommandError::Log {
                path: log_path.to_path_buf(),
                source,
            })?;
        }

        Ok(result)
    }
}

#[cfg(unix)]
fn make_private_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn make_private_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn write_log(path: &Path, invocation: &Invocation<'_>, output: &CommandOutput) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut log = fs::File::create(path)?;
    writeln!(log, "# {}", invocation.name)?;
    writeln!(log, "# exit: {:?}", output.code)?;
    writeln!(log, "--- command ---")?;
    writeln!(log, "{}", invocation.script.trim_end())?;
    writeln!(log, "--- stdout ---")?;
    log.write_all(output.stdout.as_bytes())?;
    writeln!(log, "--- stderr ---")?;
    log.write_all(output.stderr.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(script: &str) -> CommandOutput {
        ShellRunner::default()
            .run(&Invocation {
                name: "test",
                script,
                log_path: None,
            })
            .unwrap()
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let out = run("echo one\necho two\n");
        assert!(out.success());
        assert_eq!(out.last_line(), Some("two"));

        let out = run("echo nope >&2\nexit 3\n");
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stderr.trim(), "nope");
        assert!(out.last_line().is_none());
        assert!(matches!(
            out.ensure_success("test"),
            Err(CommandError::Failed { code: Some(3), .. })
        ));
    }

    #[test]
    fn shebang_scripts_run_directly() {
        let out = run("#!/bin/sh\necho \"$0\"\n");
        assert!(out.success());
        assert!(out.last_line().unwrap().contains("syncimg-"));
    }

    #[test]
    fn writes_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs/check.log");
        let out = ShellRunner::default()
            .run(&Invocation {
                name: "check",
                script: "echo checked",
                log_path: Some(&log),
            })
            .unwrap();
        assert!(out.success());
        let text = fs::read_to_string(&log).unwrap();
        assert!(text.contains("# check"));
        assert!(text.contains("checked"));
    }

    #[test]
    fn last_line_skips_trailing_blank_lines() {
        let out = CommandOutput {
            code: Some(0),
            stdout: "a\n  b  \n\n\n".into(),
            stderr: String::new(),
        };
        assert_eq!(out.last_line(), Some("b"));
    }
}
