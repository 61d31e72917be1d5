//! pm2 as an alternative process backend.
//!
//! Instead of owning child processes, the commands are registered with the pm2
//! daemon under the project's display name and survive this program exiting.

use crate::command::{CommandRunner, CommandSpec};
use crate::error::{Result, SupervisorError};
use crate::events::LogSink;
use crate::project::ProjectRecord;
use crate::runner::run_to_sink;

pub const DEFAULT_PROGRAM: &str = "pm2";

/// pm2 process names for a project: the display name, suffixed when there are several commands.
pub fn process_names(project: &ProjectRecord) -> Vec<String> {
    let name = project.display_name();
    match project.launch_commands.len() {
        0 => Vec::new(),
        1 => vec![name],
        count => (1..=count).map(|idx| format!("{}-{}", name, idx)).collect(),
    }
}

pub fn start_specs(program: &str, project: &ProjectRecord) -> Vec<CommandSpec> {
    let specs = if project.uses_default_command() {
        vec![CommandSpec::new(
            program,
            [
                "start".to_string(),
                "npm".to_string(),
                "--name".to_string(),
                project.display_name(),
                "--".to_string(),
                "start".to_string(),
            ],
        )]
    } else {
        project
            .launch_commands
            .iter()
            .zip(process_names(project))
            .map(|(command, name)| {
                CommandSpec::new(
                    program,
                    ["start".to_string(), command.clone(), "--name".to_string(), name],
                )
            })
            .collect()
    };
    specs
        .into_iter()
        .map(|spec| {
            spec.current_dir(&project.path)
                .envs(project.launch_env())
        })
        .collect()
}

pub fn stop_specs(program: &str, project: &ProjectRecord) -> Vec<CommandSpec> {
    process_names(project)
        .into_iter()
        .map(|name| CommandSpec::new(program, ["stop".to_string(), name]).current_dir(&project.path))
        .collect()
}

/// Registers the project's commands with pm2. Returns how many pm2 calls succeeded.
pub async fn start(program: &str, project: &ProjectRecord, sink: &LogSink) -> Result<usize> {
    run_all(start_specs(program, project), project, sink).await
}

pub async fn stop(program: &str, project: &ProjectRecord, sink: &LogSink) -> Result<usize> {
    run_all(stop_specs(program, project), project, sink).await
}

async fn run_all(specs: Vec<CommandSpec>, project: &ProjectRecord, sink: &LogSink) -> Result<usize> {
    let name = project.display_name();
    let runner = CommandRunner::new();
    let mut succeeded = 0;
    for spec in specs {
        let output = run_to_sink(&runner, &spec, &name, sink).await?;
        if output.success() {
            succeeded += 1;
        } else {
            sink.notice(
                &name,
                SupervisorError::ExitNonZero {
                    program: spec.display(),
                    code: output.exit_code,
                }
                .to_string(),
            );
        }
    }
    Ok(succeeded)
}
