//! Error taxonomy for supervising projects.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The executable could not be located, as opposed to running and failing.
    #[error("{program}: command not found")]
    ToolNotFound { program: String },

    #[error("{program} exited with code {}", display_code(.code))]
    ExitNonZero { program: String, code: Option<i32> },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {}s", .after.as_secs())]
    TimedOut { program: String, after: Duration },

    #[error("project directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("{project} already has running processes")]
    AlreadyRunning { project: String },

    #[error("config file {} does not exist", .path.display())]
    ConfigMissing { path: PathBuf },

    #[error("config file {} is malformed: {reason}", .path.display())]
    ConfigMalformed { path: PathBuf, reason: String },

    #[error("invalid port {0} (expected 1-65535)")]
    InvalidPort(u32),

    #[error("invalid environment entry {0:?} (expected KEY=VALUE)")]
    InvalidEnv(String),

    #[error("project {0} is already registered")]
    DuplicateProject(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown (terminated by signal)".to_string(),
    }
}

impl SupervisorError {
    /// Builds the error for a failed `spawn`, separating a missing executable from other causes.
    pub fn from_spawn(program: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::ToolNotFound {
                program: program.to_string(),
            }
        } else {
            Self::Spawn {
                program: program.to_string(),
                source: err,
            }
        }
    }
}
