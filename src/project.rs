//! Project records.
//!
//! A `ProjectRecord` is the in-memory form of one registered Node.js project:
//! where it lives, which port it is told to bind, extra environment and the
//! shell commands that start it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, SupervisorError};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_COMMAND: &str = "npm start";

/// One managed project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    /// Directory the project lives in; every command runs here.
    pub path: PathBuf,
    /// Port exported as `PORT` to every command.
    pub port: u16,
    /// Explicit name. `None` means derive it from `path`.
    pub name: Option<String>,
    /// Extra environment layered over the inherited one.
    pub env: BTreeMap<String, String>,
    /// Shell commands started together on launch.
    pub launch_commands: Vec<String>,
}

impl ProjectRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            port: DEFAULT_PORT,
            name: None,
            env: BTreeMap::new(),
            launch_commands: vec![DEFAULT_COMMAND.to_string()],
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = if name.trim().is_empty() { None } else { Some(name) };
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.launch_commands = commands;
        self
    }

    /// Logical identifier of the project. Never empty.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|name| !name.trim().is_empty()) {
            return name.to_string();
        }
        path_name(&self.path).unwrap_or_else(|| "project".to_string())
    }

    /// Environment overlay for spawned commands, in application order.
    ///
    /// `PORT` comes first so an explicit `env["PORT"]` overrides it.
    pub fn launch_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::with_capacity(self.env.len() + 1);
        env.push(("PORT".to_string(), self.port.to_string()));
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// The effective value of `PORT` seen by spawned commands.
    pub fn effective_port(&self) -> String {
        self.env
            .get("PORT")
            .cloned()
            .unwrap_or_else(|| self.port.to_string())
    }

    /// Whether launching runs only the stock `npm start`.
    pub fn uses_default_command(&self) -> bool {
        self.launch_commands.len() == 1 && self.launch_commands[0].trim() == DEFAULT_COMMAND
    }
}

fn path_name(path: &Path) -> Option<String> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .or_else(|| {
            std::path::absolute(path)
                .ok()
                .and_then(|abs| abs.file_name().map(|n| n.to_string_lossy().into_owned()))
        })?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Checks a user-supplied port before it reaches a record.
pub fn validate_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(SupervisorError::InvalidPort(port)),
    }
}

/// Parses a `KEY=VALUE` entry. The value may be empty or contain `=`.
pub fn parse_env_pair(raw: &str) -> Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(SupervisorError::InvalidEnv(raw.to_string()));
    };
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(SupervisorError::InvalidEnv(raw.to_string()));
    }
    Ok((key.to_string(), value.to_string()))
}
