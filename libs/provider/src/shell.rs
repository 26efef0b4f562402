//! Remote shell abstraction.
//!
//! Every transport the system uses to run commands on an instance (an SSH
//! subprocess, a local sandbox engine's exec, a fleet service's exec API, or
//! the operator's own machine) is a [`RemoteShell`]. Each `run` is a fresh
//! shell: no state survives between invocations, so multi-step procedures
//! are rendered into one script.

use std::borrow::Cow;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{FleetError, Result};
use crate::vm::Vm;

/// Bytes of output kept when reporting diagnostics.
pub const DIAGNOSTIC_TAIL: usize = 500;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status (-1 if the process was killed by a signal).
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited zero.
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Stdout and stderr concatenated.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// The last `max` bytes of combined output, on a char boundary.
    pub fn tail(&self, max: usize) -> String {
        tail(&self.combined(), max).to_string()
    }

    fn from_process(output: std::process::Output) -> Self {
        Self {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// The last `max` bytes of `s`, never splitting a character.
pub fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Quote a string for a POSIX shell.
///
/// Strings made only of safe characters are returned unchanged; everything
/// else is single-quoted with embedded quotes escaped as `'"'"'`.
pub fn quote(s: &str) -> Cow<'_, str> {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !s.is_empty() && s.chars().all(safe) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(format!("'{}'", s.replace('\'', r#"'"'"'"#)))
}

/// Shell command that writes `contents` to `path` without needing stdin.
pub fn write_file_command(contents: &[u8], path: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(contents);
    format!("printf '%s' {encoded} | base64 -d > {path}")
}

/// A place commands can be run.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` through `bash -c` and capture its output.
    ///
    /// A non-zero exit is not an error at this level; transport failures are.
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Write `contents` to `path` on the target.
    ///
    /// `path` is interpolated into a shell command unquoted so `~` expands;
    /// callers pass fixed layout paths only.
    async fn put(&self, contents: &[u8], path: &str) -> Result<()> {
        self.run_checked(&write_file_command(contents, path))
            .await
            .map(|_| ())
    }

    /// Run `command` and fail on non-zero exit.
    async fn run_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.run(command).await?;
        if !output.success() {
            return Err(FleetError::Command {
                command: redact(command),
                status: output.status,
                output: output.tail(DIAGNOSTIC_TAIL),
            });
        }
        Ok(output)
    }
}

/// Opens shells on instances.
pub trait Connector: Send + Sync {
    /// A shell on `vm`.
    fn connect(&self, vm: &Vm) -> Result<Arc<dyn RemoteShell>>;
}

/// Commands can carry credentials; errors and logs name only the program.
fn redact(command: &str) -> String {
    let mut words = command.split_whitespace();
    match (words.next(), words.next()) {
        (Some(first), Some(_)) => format!("{first} ..."),
        (Some(first), None) => first.to_string(),
        _ => String::new(),
    }
}

/// Runs commands on the operator's machine.
#[derive(Debug, Clone, Default)]
pub struct LocalShell;

#[async_trait]
impl RemoteShell for LocalShell {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!(command = %redact(command), "Running local command");
        let output = Command::new("bash")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CommandOutput::from_process(output))
    }

    async fn put(&self, contents: &[u8], path: &str) -> Result<()> {
        let mut child = Command::new("bash")
            .arg("-c")
            .arg(format!("cat > {path}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(contents).await?;
        }

        let output = child.wait_with_output().await?;
        let output = CommandOutput::from_process(output);
        if !output.success() {
            return Err(FleetError::Command {
                command: format!("write {path}"),
                status: output.status,
                output: output.tail(DIAGNOSTIC_TAIL),
            });
        }
        Ok(())
    }
}

/// Run a local process and capture its output (used by SSH transports).
pub(crate) async fn run_process(mut command: Command) -> Result<CommandOutput> {
    let output = command.stdin(Stdio::null()).output().await?;
    Ok(CommandOutput::from_process(output))
}
