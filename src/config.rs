//! Persistent project list.
//!
//! Projects are stored as a flat JSON document:
//! `{"projects": [{"path": "...", "port": 3000, "name": "...", "env": {...}, "commands": [...]}]}`.
//! Older files may carry a single `command` string instead of `commands`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};
use crate::project::{validate_port, ProjectRecord, DEFAULT_COMMAND, DEFAULT_PORT};

pub const DEFAULT_CONFIG_FILE: &str = "projects.json";

/// Top-level structure of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// Stored form of one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub path: String,
    #[serde(default = "default_port")]
    pub port: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
    /// Legacy single command; read but never written.
    #[serde(default, skip_serializing)]
    pub command: Option<String>,
}

fn default_port() -> u32 {
    u32::from(DEFAULT_PORT)
}

impl ProjectConfig {
    fn into_record(self, source: &Path) -> Result<ProjectRecord> {
        let port = validate_port(self.port).map_err(|err| SupervisorError::ConfigMalformed {
            path: source.to_path_buf(),
            reason: format!("project {}: {}", self.path, err),
        })?;
        let launch_commands = match (self.commands, self.command) {
            (Some(commands), _) => commands,
            (None, Some(command)) => vec![command],
            (None, None) => vec![DEFAULT_COMMAND.to_string()],
        };
        Ok(ProjectRecord {
            path: self.path.into(),
            port,
            name: self.name,
            env: self.env,
            launch_commands,
        })
    }
}

impl From<&ProjectRecord> for ProjectConfig {
    fn from(project: &ProjectRecord) -> Self {
        Self {
            path: project.path.to_string_lossy().into_owned(),
            port: u32::from(project.port),
            name: project.name.clone(),
            env: project.env.clone(),
            commands: Some(project.launch_commands.clone()),
            command: None,
        }
    }
}

/// Loads every project from `path`. A missing file is `ConfigMissing`.
pub fn load(path: &Path) -> Result<Vec<ProjectRecord>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(SupervisorError::ConfigMissing {
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(err.into()),
    };
    let config: ConfigFile =
        serde_json::from_str(&raw).map_err(|err| SupervisorError::ConfigMalformed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    config
        .projects
        .into_iter()
        .map(|project| project.into_record(path))
        .collect()
}

/// Like `load`, but a missing file yields an empty list.
pub fn load_or_default(path: &Path) -> Result<Vec<ProjectRecord>> {
    match load(path) {
        Err(SupervisorError::ConfigMissing { .. }) => Ok(Vec::new()),
        other => other,
    }
}

/// Writes `projects` to `path` as pretty-printed JSON, creating parent directories.
pub fn save(path: &Path, projects: &[ProjectRecord]) -> Result<()> {
    let config = ConfigFile {
        projects: projects.iter().map(ProjectConfig::from).collect(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut serialized = serde_json::to_string_pretty(&config).map_err(std::io::Error::from)?;
    serialized.push('\n');
    std::fs::write(path, serialized)?;
    Ok(())
}

/// Lookup and mutation helpers over a loaded project list.
#[derive(Debug, Clone, Default)]
pub struct ProjectStore {
    pub projects: Vec<ProjectRecord>,
}

impl ProjectStore {
    pub fn new(projects: Vec<ProjectRecord>) -> Self {
        Self { projects }
    }

    pub fn find(&self, name: &str) -> Option<&ProjectRecord> {
        self.projects.iter().find(|p| p.display_name() == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut ProjectRecord> {
        self.projects.iter_mut().find(|p| p.display_name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.projects.iter().map(ProjectRecord::display_name).collect()
    }

    /// Adds `project`, refusing a second project with the same display name.
    pub fn add(&mut self, project: ProjectRecord) -> Result<()> {
        let name = project.display_name();
        if self.find(&name).is_some() {
            return Err(SupervisorError::DuplicateProject(name));
        }
        self.projects.push(project);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<ProjectRecord> {
        let idx = self.projects.iter().position(|p| p.display_name() == name)?;
        Some(self.projects.remove(idx))
    }
}
