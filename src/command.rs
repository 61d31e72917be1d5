//! Short-lived command execution.
//!
//! `CommandRunner` runs things like `git pull` or `npm install` to completion,
//! capturing stdout and stderr as one combined stream. A missing executable is
//! reported as `ToolNotFound`; a non-zero exit is *not* an error here, the
//! caller inspects `CommandOutput::exit_code` and decides.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, SupervisorError};
use crate::output::StreamKind;

/// What to run, where, and with which environment overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Applied in order over the inherited environment; later entries win.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Splits a command line with shell quoting rules, without invoking a shell.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let mut parts = shell_words::split(raw).map_err(|err| SupervisorError::Spawn {
            program: raw.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
        })?;
        if parts.is_empty() {
            return Ok(None);
        }
        let program = parts.remove(0);
        Ok(Some(Self::new(program, parts)))
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// stdout and stderr lines in the order they arrived, newline-terminated.
    pub combined: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds every run; `None` waits forever.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Runs `spec` to completion. `on_line` sees every output line as it arrives.
    pub async fn run<F>(&self, spec: &CommandSpec, mut on_line: F) -> Result<CommandOutput>
    where
        F: FnMut(StreamKind, &str),
    {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %spec.display(), cwd = ?spec.cwd, "running command");
        let mut child = command
            .spawn()
            .map_err(|err| SupervisorError::from_spawn(&spec.program, err))?;
        let mut lines = merged_lines(&mut child);

        let mut combined = String::new();
        let run = async {
            while let Some((stream, line)) = lines.recv().await {
                on_line(stream, &line);
                combined.push_str(&line);
                combined.push('\n');
            }
            child.wait().await
        };
        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };
        let Some(status) = waited else {
            let after = self.timeout.unwrap_or_default();
            warn!(command = %spec.display(), ?after, "command timed out, killing it");
            let _ = child.kill().await;
            return Err(SupervisorError::TimedOut {
                program: spec.program.clone(),
                after,
            });
        };
        let status = status?;
        debug!(command = %spec.display(), code = ?status.code(), "command finished");
        Ok(CommandOutput {
            exit_code: status.code(),
            combined,
        })
    }
}

/// Takes the child's stdout and stderr and merges them into one line channel.
///
/// Each stream gets its own reader task; the channel closes once both reach EOF.
pub(crate) fn merged_lines(child: &mut Child) -> mpsc::UnboundedReceiver<(StreamKind, String)> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(read_stream(StreamKind::Stdout, stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(read_stream(StreamKind::Stderr, stderr, tx));
    }
    rx
}

async fn read_stream<R>(
    stream: StreamKind,
    reader: R,
    tx: mpsc::UnboundedSender<(StreamKind, String)>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    // Bytes, not `lines()`: a line that is not UTF-8 must not end the stream.
    while let Ok(read) = reader.read_until(b'\n', &mut buf).await {
        if read == 0 {
            break;
        }
        let _ = tx.send((stream, decode_line(&buf)));
        buf.clear();
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
