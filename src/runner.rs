//! Project process supervision.
//!
//! The `Supervisor` owns every long-running child process, grouped by project.
//! It launches a project's commands with the merged environment, forwards each
//! process's output to the log sink from a dedicated task, and terminates
//! processes on request or at shutdown. Output tasks only ever append to the
//! sink; the tracked-process sets are mutated solely by `&mut self` methods
//! called from the coordination context.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::{merged_lines, CommandOutput, CommandRunner, CommandSpec};
use crate::error::{Result, SupervisorError};
use crate::events::{AlertKind, LogSink};
use crate::output::StreamKind;
use crate::pm2;
use crate::process::{ManagedProcess, SlotStatus};
use crate::project::ProjectRecord;

#[cfg(unix)]
const SHELL: &str = "sh";
#[cfg(not(unix))]
const SHELL: &str = "cmd";

/// Exit code a POSIX shell uses when the command itself was not found.
const SHELL_NOT_FOUND: i32 = 127;

/// How launched commands are kept alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Child processes owned by this supervisor.
    #[default]
    Direct,
    /// Hand the commands to the pm2 daemon.
    Pm2,
}

/// What to do when `launch` is called while the project still has live processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchPolicy {
    /// Start another set of processes alongside the running ones.
    #[default]
    AllowDuplicates,
    /// Refuse with `AlreadyRunning`.
    RejectWhileRunning,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Dependency install step run before launching. `None` skips it.
    pub install: Option<CommandSpec>,
    /// Upper bound for the install step. `None` waits forever.
    pub install_timeout: Option<Duration>,
    pub launch_policy: LaunchPolicy,
    pub backend: Backend,
    pub git_program: String,
    pub pm2_program: String,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            install: Some(CommandSpec::new("npm", ["install"])),
            install_timeout: None,
            launch_policy: LaunchPolicy::default(),
            backend: Backend::default(),
            git_program: "git".to_string(),
            pm2_program: pm2::DEFAULT_PROGRAM.to_string(),
        }
    }
}

/// Summary of a successful `launch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    /// Processes now tracked (direct backend) or handed to pm2.
    pub started: usize,
    pub pids: Vec<u32>,
}

/// Owns the live child processes of every project.
#[derive(Debug, Default)]
pub struct Supervisor {
    options: SupervisorOptions,
    tracked: HashMap<String, Vec<ManagedProcess>>,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            tracked: HashMap::new(),
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Installs dependencies, then starts every launch command of `project`.
    ///
    /// Blocks the caller for the install step only; the launched processes are
    /// left running and their output keeps flowing into `sink`.
    pub async fn launch(&mut self, project: &ProjectRecord, sink: &LogSink) -> Result<LaunchReport> {
        let name = project.display_name();
        ensure_directory(project)?;
        self.reap(sink);
        self.prune(&name);
        if self.options.launch_policy == LaunchPolicy::RejectWhileRunning
            && self.live_count(&name) > 0
        {
            sink.notice(&name, "already running");
            return Err(SupervisorError::AlreadyRunning { project: name });
        }

        self.install(project, &name, sink).await?;

        if project.launch_commands.is_empty() {
            sink.notice(&name, "no launch commands configured");
            return Ok(LaunchReport {
                started: 0,
                pids: Vec::new(),
            });
        }

        match self.options.backend {
            Backend::Pm2 => {
                let started = pm2::start(&self.options.pm2_program, project, sink).await?;
                Ok(LaunchReport {
                    started,
                    pids: Vec::new(),
                })
            }
            Backend::Direct => self.spawn_all(project, &name, sink),
        }
    }

    async fn install(&self, project: &ProjectRecord, name: &str, sink: &LogSink) -> Result<()> {
        let Some(install) = &self.options.install else {
            return Ok(());
        };
        let spec = install
            .clone()
            .current_dir(&project.path)
            .envs(project.launch_env());
        sink.notice(name, format!("running {}", spec.display()));
        let runner = CommandRunner::with_timeout(self.options.install_timeout);
        let output = run_to_sink(&runner, &spec, name, sink).await?;
        if !output.success() {
            warn!(project = %name, code = ?output.exit_code, "install step failed, launching anyway");
            sink.notice(
                name,
                SupervisorError::ExitNonZero {
                    program: spec.display(),
                    code: output.exit_code,
                }
                .to_string(),
            );
        }
        Ok(())
    }

    fn spawn_all(&mut self, project: &ProjectRecord, name: &str, sink: &LogSink) -> Result<LaunchReport> {
        let env = project.launch_env();
        let mut pids = Vec::new();
        let mut started = 0;
        for command_line in &project.launch_commands {
            let mut command = shell_command(command_line);
            command
                .current_dir(&project.path)
                .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            // Dropping the handle must not kill the process; `stop` signals it instead.
            command.kill_on_drop(false);

            #[cfg(windows)]
            {
                const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
                command.creation_flags(CREATE_NEW_PROCESS_GROUP);
            }

            #[cfg(unix)]
            unsafe {
                command.pre_exec(|| {
                    let _ = libc::setpgid(0, 0);
                    Ok(())
                });
            }

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(err) => {
                    let err = SupervisorError::from_spawn(SHELL, err);
                    report_failure(&err, name, sink);
                    return Err(err);
                }
            };
            let lines = merged_lines(&mut child);
            let mut slot = ManagedProcess::new(command_line.clone());
            slot.attach(child);
            if let Some(pid) = slot.pid() {
                pids.push(pid);
            }
            info!(project = %name, command = %command_line, pid = ?slot.pid(), "spawned");
            sink.notice(name, format!("started: {}", command_line));
            tokio::spawn(forward_output(
                name.to_string(),
                command_line.clone(),
                lines,
                sink.clone(),
            ));
            self.tracked.entry(name.to_string()).or_default().push(slot);
            started += 1;
        }
        Ok(LaunchReport { started, pids })
    }

    /// Sends a graceful termination signal to every live process of `project`.
    ///
    /// The tracked set is cleared without waiting for the processes to exit.
    pub async fn stop(&mut self, project: &ProjectRecord, sink: &LogSink) -> Result<usize> {
        let name = project.display_name();
        if self.options.backend == Backend::Pm2 {
            let stopped = pm2::stop(&self.options.pm2_program, project, sink).await?;
            sink.notice(&name, "stopped");
            return Ok(stopped);
        }

        self.reap(sink);
        let signalled = self
            .tracked
            .remove(&name)
            .map(|slots| terminate_all(&name, slots))
            .unwrap_or(0);
        if signalled == 0 {
            sink.notice(&name, "not running");
        } else {
            sink.notice(&name, format!("stopped ({} process(es) signalled)", signalled));
        }
        Ok(signalled)
    }

    /// Runs `git pull origin main` in the project directory.
    ///
    /// A non-zero exit is returned in the output and raised as an alert on the sink.
    pub async fn update(&self, project: &ProjectRecord, sink: &LogSink) -> Result<CommandOutput> {
        let name = project.display_name();
        ensure_directory(project)?;
        let spec = CommandSpec::new(&self.options.git_program, ["pull", "origin", "main"])
            .current_dir(&project.path);
        sink.notice(&name, format!("running {}", spec.display()));
        let output = run_to_sink(&CommandRunner::new(), &spec, &name, sink).await?;
        if !output.success() {
            let err = SupervisorError::ExitNonZero {
                program: spec.display(),
                code: output.exit_code,
            };
            warn!(project = %name, code = ?output.exit_code, "update failed");
            sink.alert(&name, AlertKind::ExitNonZero, err.to_string());
        }
        Ok(output)
    }

    /// Reports natural exits that have not been reported yet, including ones
    /// first noticed by `live_count`, `total_live` or `status`. Returns how many.
    pub fn reap(&mut self, sink: &LogSink) -> usize {
        let mut exited = 0;
        for (name, slots) in self.tracked.iter_mut() {
            for slot in slots.iter_mut() {
                let Some(code) = slot.take_unreported_exit() else {
                    continue;
                };
                exited += 1;
                debug!(project = %name, command = %slot.command, ?code, "process exited");
                if code == Some(SHELL_NOT_FOUND) {
                    sink.alert(
                        name,
                        AlertKind::ToolNotFound,
                        format!("{}: command not found", slot.command),
                    );
                } else if let Some(code) = code.filter(|code| *code != 0) {
                    sink.notice(name, format!("{} exited with code {}", slot.command, code));
                }
            }
        }
        exited
    }

    /// Number of processes of `name` that are still running.
    pub fn live_count(&mut self, name: &str) -> usize {
        self.tracked
            .get_mut(name)
            .map(|slots| count_alive(slots.iter_mut()))
            .unwrap_or(0)
    }

    /// Total number of live processes across every project.
    pub fn total_live(&mut self) -> usize {
        count_alive(self.tracked.values_mut().flat_map(|slots| slots.iter_mut()))
    }

    pub fn status(&mut self, name: &str) -> Vec<SlotStatus> {
        let Some(slots) = self.tracked.get_mut(name) else {
            return Vec::new();
        };
        slots
            .iter_mut()
            .map(|slot| {
                slot.refresh();
                SlotStatus {
                    command: slot.command.clone(),
                    status: slot.status,
                }
            })
            .collect()
    }

    /// Best-effort termination sweep over every project. Does not wait for exits.
    pub fn shutdown_all(&mut self) -> usize {
        let mut signalled = 0;
        for (name, slots) in self.tracked.drain() {
            signalled += terminate_all(&name, slots);
        }
        signalled
    }

    // Drop slots from earlier launches that have already exited.
    fn prune(&mut self, name: &str) {
        if let Some(slots) = self.tracked.get_mut(name) {
            slots.retain_mut(|slot| slot.is_alive());
            if slots.is_empty() {
                self.tracked.remove(name);
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let signalled = self.shutdown_all();
        if signalled > 0 {
            debug!(signalled, "terminated remaining processes on drop");
        }
    }
}

/// Runs `spec`, forwarding each line to `sink` and alerting on spawn-level failures.
pub(crate) async fn run_to_sink(
    runner: &CommandRunner,
    spec: &CommandSpec,
    project: &str,
    sink: &LogSink,
) -> Result<CommandOutput> {
    let result = runner
        .run(spec, |stream, line| {
            sink.output(project, line.to_string(), stream)
        })
        .await;
    if let Err(err) = &result {
        report_failure(err, project, sink);
    }
    result
}

fn report_failure(err: &SupervisorError, project: &str, sink: &LogSink) {
    let kind = match err {
        SupervisorError::ToolNotFound { .. } => AlertKind::ToolNotFound,
        SupervisorError::TimedOut { .. } => AlertKind::TimedOut,
        _ => AlertKind::ExitNonZero,
    };
    warn!(project, error = %err, "command could not run");
    sink.alert(project, kind, err.to_string());
}

fn ensure_directory(project: &ProjectRecord) -> Result<()> {
    if project.path.is_dir() {
        Ok(())
    } else {
        Err(SupervisorError::MissingDirectory(project.path.clone()))
    }
}

fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new(SHELL);
    if cfg!(unix) {
        command.arg("-c");
    } else {
        command.arg("/C");
    }
    command.arg(command_line);
    command
}

fn count_alive<'a>(slots: impl Iterator<Item = &'a mut ManagedProcess>) -> usize {
    slots.fold(0, |alive, slot| alive + usize::from(slot.is_alive()))
}

fn terminate_all(name: &str, slots: Vec<ManagedProcess>) -> usize {
    let mut signalled = 0;
    for mut slot in slots {
        if slot.is_alive() {
            if let Some(pid) = slot.pid() {
                info!(project = %name, command = %slot.command, pid, "sending SIGTERM");
                send_terminate(pid);
                signalled += 1;
            }
        }
        slot.release();
    }
    signalled
}

// Forward one process's combined output until both streams close.
async fn forward_output(
    project: String,
    command: String,
    mut lines: mpsc::UnboundedReceiver<(StreamKind, String)>,
    sink: LogSink,
) {
    while let Some((stream, line)) = lines.recv().await {
        sink.output(&project, line, stream);
    }
    sink.exited(&project, &command);
}

#[cfg(unix)]
fn send_terminate(pid: u32) {
    // The child leads its own process group, so this also reaches the
    // processes the shell started. The bare pid is only a fallback for a
    // child whose group could not be signalled.
    unsafe {
        let pid = pid as i32;
        if libc::kill(-pid, libc::SIGTERM) != 0 {
            let _ = libc::kill(pid, libc::SIGTERM);
        }
    }
}

#[cfg(windows)]
fn send_terminate(pid: u32) {
    use windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent;
    use windows_sys::Win32::System::Console::CTRL_BREAK_EVENT;
    // Windows has no SIGTERM; CTRL_BREAK is the closest console signal we can emit.
    unsafe {
        let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
    }
}

#[cfg(all(not(unix), not(windows)))]
fn send_terminate(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::output::{OutputFormat, OutputState};
    use crate::process::ProcessStatus;

    fn quiet_options() -> SupervisorOptions {
        SupervisorOptions {
            install: None,
            ..SupervisorOptions::default()
        }
    }

    fn project_in(dir: &std::path::Path, commands: &[&str]) -> ProjectRecord {
        ProjectRecord::new(dir.join("my-app"))
            .with_port(4000)
            .with_commands(commands.iter().map(|c| c.to_string()).collect())
    }

    fn app_dir(root: &tempfile::TempDir) -> std::path::PathBuf {
        let dir = root.path().join("my-app");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn collect_until_exits(
        rx: &mut mpsc::UnboundedReceiver<Event>,
        exits: usize,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        let mut seen = 0;
        let deadline = Duration::from_secs(10);
        while seen < exits {
            let event = tokio::time::timeout(deadline, rx.recv())
                .await
                .expect("timed out waiting for sink")
                .expect("sink closed");
            if matches!(event, Event::Exited { .. }) {
                seen += 1;
            }
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn launch_forwards_each_command_output_with_prefix() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["printf a", "printf b"]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());

        let report = supervisor.launch(&project, &sink).await.unwrap();
        assert_eq!(report.started, 2);

        let events = collect_until_exits(&mut rx, 2).await;
        let output = OutputState::new(OutputFormat::default());
        let mut lines: Vec<String> = events
            .iter()
            .filter(|event| matches!(event, Event::Output { .. }))
            .map(|event| output.format(event))
            .collect();
        lines.sort();
        assert_eq!(lines, vec!["[my-app] a", "[my-app] b"]);
    }

    #[tokio::test]
    async fn explicit_env_port_wins_over_record_port() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let mut project = project_in(root.path(), &["printf %s \"$PORT\""]).with_port(3000);
        project.env.insert("PORT".into(), "9999".into());
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        supervisor.launch(&project, &sink).await.unwrap();

        let events = collect_until_exits(&mut rx, 1).await;
        let outputs: Vec<String> = events
            .iter()
            .filter_map(|event| match event {
                Event::Output { line, .. } => Some(line.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(outputs, vec!["9999"]);
    }

    #[tokio::test]
    async fn record_port_is_exported_without_override() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["printf %s \"$PORT\""]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        supervisor.launch(&project, &sink).await.unwrap();
        let events = collect_until_exits(&mut rx, 1).await;
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Output { line, .. } if line == "4000"
        )));
    }

    #[tokio::test]
    async fn stop_without_processes_still_notifies() {
        let root = tempfile::tempdir().unwrap();
        let project = project_in(root.path(), &["npm start"]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        let signalled = supervisor.stop(&project, &sink).await.unwrap();
        assert_eq!(signalled, 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::Notice {
                project: "my-app".into(),
                message: "not running".into()
            }
        );
    }

    #[tokio::test]
    async fn stop_signals_running_processes_and_clears_them() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["sleep 30", "sleep 30"]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        supervisor.launch(&project, &sink).await.unwrap();
        assert_eq!(supervisor.live_count("my-app"), 2);

        let signalled = supervisor.stop(&project, &sink).await.unwrap();
        assert_eq!(signalled, 2);
        assert_eq!(supervisor.live_count("my-app"), 0);
        assert!(supervisor.status("my-app").is_empty());

        // The output tasks see EOF once the group is gone.
        let events = collect_until_exits(&mut rx, 2).await;
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Notice { message, .. } if message.starts_with("stopped")
        )));
    }

    #[tokio::test]
    async fn missing_install_tool_leaves_running_processes_untouched() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["sleep 30"]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        supervisor.launch(&project, &sink).await.unwrap();
        assert_eq!(supervisor.live_count("my-app"), 1);

        supervisor.options.install = Some(CommandSpec::new("noderack-missing-npm", ["install"]));
        let err = supervisor.launch(&project, &sink).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ToolNotFound { .. }));
        assert_eq!(supervisor.live_count("my-app"), 1);
        assert_eq!(supervisor.status("my-app").len(), 1);

        let mut saw_alert = false;
        while let Ok(event) = rx.try_recv() {
            if let Event::Alert { kind, .. } = event {
                saw_alert |= kind == AlertKind::ToolNotFound;
            }
        }
        assert!(saw_alert);
        supervisor.shutdown_all();
    }

    #[tokio::test]
    async fn install_step_output_reaches_sink_before_launch() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["printf ran"]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(SupervisorOptions {
            install: Some(CommandSpec::new("sh", ["-c", "echo installing on $PORT"])),
            ..SupervisorOptions::default()
        });
        supervisor.launch(&project, &sink).await.unwrap();
        let events = collect_until_exits(&mut rx, 1).await;
        let outputs: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                Event::Output { line, .. } => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(outputs, vec!["installing on 4000", "ran"]);
    }

    #[tokio::test]
    async fn reject_policy_refuses_second_launch() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["sleep 30"]);
        let (sink, _rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(SupervisorOptions {
            launch_policy: LaunchPolicy::RejectWhileRunning,
            ..quiet_options()
        });
        supervisor.launch(&project, &sink).await.unwrap();
        let err = supervisor.launch(&project, &sink).await.unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning { .. }));
        assert_eq!(supervisor.live_count("my-app"), 1);
        assert_eq!(supervisor.shutdown_all(), 1);
    }

    #[tokio::test]
    async fn default_policy_allows_duplicate_launches() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["sleep 30"]);
        let (sink, _rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        supervisor.launch(&project, &sink).await.unwrap();
        supervisor.launch(&project, &sink).await.unwrap();
        assert_eq!(supervisor.live_count("my-app"), 2);
        assert_eq!(supervisor.shutdown_all(), 2);
        assert_eq!(supervisor.total_live(), 0);
    }

    #[tokio::test]
    async fn reap_reports_shell_not_found_as_alert() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["noderack-missing-interpreter server.js"]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        supervisor.launch(&project, &sink).await.unwrap();
        collect_until_exits(&mut rx, 1).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while supervisor.reap(&sink) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let status = supervisor.status("my-app");
        assert_eq!(status[0].status, ProcessStatus::Exited { code: Some(127) });
        let alert = std::iter::from_fn(|| rx.try_recv().ok())
            .find(|event| matches!(event, Event::Alert { .. }));
        assert!(matches!(
            alert,
            Some(Event::Alert {
                kind: AlertKind::ToolNotFound,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn exit_seen_by_total_live_is_still_reaped() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["noderack-missing-interpreter server.js"]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        supervisor.launch(&project, &sink).await.unwrap();
        collect_until_exits(&mut rx, 1).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while supervisor.total_live() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(supervisor.total_live(), 0);
        assert_eq!(supervisor.reap(&sink), 1);
        assert_eq!(supervisor.reap(&sink), 0);
        let alerts: Vec<Event> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| matches!(event, Event::Alert { .. }))
            .collect();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(
            alerts[0],
            Event::Alert {
                kind: AlertKind::ToolNotFound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_output_keeps_forwarding() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["printf 'before\\n\\377bad\\nafter1\\nafter2\\n'"]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        supervisor.launch(&project, &sink).await.unwrap();
        let lines: Vec<String> = collect_until_exits(&mut rx, 1)
            .await
            .into_iter()
            .filter_map(|event| match event {
                Event::Output { line, .. } => Some(line),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["before", "\u{fffd}bad", "after1", "after2"]);
    }

    #[tokio::test]
    async fn update_failure_raises_exit_non_zero_alert() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["npm start"]);
        let (sink, mut rx) = LogSink::channel();
        let supervisor = Supervisor::new(SupervisorOptions {
            git_program: "false".into(),
            ..quiet_options()
        });
        let output = supervisor.update(&project, &sink).await.unwrap();
        assert_eq!(output.exit_code, Some(1));
        let alerts: Vec<Event> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| matches!(event, Event::Alert { .. }))
            .collect();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(
            alerts[0],
            Event::Alert {
                kind: AlertKind::ExitNonZero,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn update_outside_git_repository_is_non_zero() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &["npm start"]);
        let has_git = std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success());
        if !has_git {
            eprintln!("git is not installed; skipping");
            return;
        }
        let (sink, mut rx) = LogSink::channel();
        let supervisor = Supervisor::new(quiet_options());
        let output = supervisor.update(&project, &sink).await.unwrap();
        assert!(!output.success());
        assert!(std::iter::from_fn(|| rx.try_recv().ok()).any(|event| matches!(
            event,
            Event::Alert {
                kind: AlertKind::ExitNonZero,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn missing_project_directory_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let project = project_in(root.path(), &["npm start"]);
        let (sink, _rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        let err = supervisor.launch(&project, &sink).await.unwrap_err();
        assert!(matches!(err, SupervisorError::MissingDirectory(_)));
    }

    #[tokio::test]
    async fn empty_command_list_launches_nothing() {
        let root = tempfile::tempdir().unwrap();
        app_dir(&root);
        let project = project_in(root.path(), &[]);
        let (sink, mut rx) = LogSink::channel();
        let mut supervisor = Supervisor::new(quiet_options());
        let report = supervisor.launch(&project, &sink).await.unwrap();
        assert_eq!(report.started, 0);
        assert_eq!(rx.try_recv().unwrap().text(), "no launch commands configured");
    }
}
