//! Events delivered to the log sink.
//!
//! Every front end consumes the same stream: command output, process exits,
//! informational notices and alerts that should be shown as errors rather
//! than plain log lines.

use tokio::sync::mpsc;

use crate::output::StreamKind;

/// A single entry appended to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A line of output from a command run on behalf of `project`.
    Output {
        project: String,
        line: String,
        stream: StreamKind,
    },
    /// A launched process closed its output streams.
    Exited { project: String, command: String },
    /// Informational notice ("stopped", "not running", ...).
    Notice { project: String, message: String },
    /// A failure the user should see as an error notice.
    Alert {
        project: String,
        kind: AlertKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    ToolNotFound,
    ExitNonZero,
    TimedOut,
}

impl AlertKind {
    pub fn label(self) -> &'static str {
        match self {
            AlertKind::ToolNotFound => "tool not found",
            AlertKind::ExitNonZero => "command failed",
            AlertKind::TimedOut => "timed out",
        }
    }
}

impl Event {
    pub fn project(&self) -> &str {
        match self {
            Event::Output { project, .. }
            | Event::Exited { project, .. }
            | Event::Notice { project, .. }
            | Event::Alert { project, .. } => project,
        }
    }

    /// The human-readable line without any prefix.
    pub fn text(&self) -> String {
        match self {
            Event::Output { line, .. } => line.clone(),
            Event::Exited { command, .. } => format!("process exited: {}", command),
            Event::Notice { message, .. } => message.clone(),
            Event::Alert { kind, message, .. } => format!("error ({}): {}", kind.label(), message),
        }
    }
}

/// Append-only destination for log lines.
///
/// Backed by an unbounded channel so producers never wait on the consumer;
/// the coordination context can sit in a long install step while output
/// keeps accumulating. Lines sent after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl LogSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn output(&self, project: &str, line: String, stream: StreamKind) {
        self.send(Event::Output {
            project: project.to_string(),
            line,
            stream,
        });
    }

    pub fn exited(&self, project: &str, command: &str) {
        self.send(Event::Exited {
            project: project.to_string(),
            command: command.to_string(),
        });
    }

    pub fn notice(&self, project: &str, message: impl Into<String>) {
        self.send(Event::Notice {
            project: project.to_string(),
            message: message.into(),
        });
    }

    pub fn alert(&self, project: &str, kind: AlertKind, message: impl Into<String>) {
        self.send(Event::Alert {
            project: project.to_string(),
            kind,
            message: message.into(),
        });
    }
}
