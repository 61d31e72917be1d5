//! Noderack: launch, update and stop local Node.js projects.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads the project list, and drives the supervisor while printing everything
//! the log sink receives.

mod command;
mod config;
mod error;
mod events;
mod output;
mod pm2;
mod process;
mod project;
mod runner;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::command::CommandSpec;
use crate::config::{ProjectStore, DEFAULT_CONFIG_FILE};
use crate::events::{Event, LogSink};
use crate::output::{OutputFormat, OutputState, StreamKind};
use crate::project::{parse_env_pair, validate_port, ProjectRecord};
use crate::runner::{Backend, LaunchPolicy, Supervisor, SupervisorOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum BackendArg {
    Direct,
    Pm2,
}

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "noderack",
    version,
    about = "Launch, update and stop local Node.js projects",
    styles = help_styles()
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the projects JSON file.
    #[arg(long, global = true, env = "NODERACK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Keep processes as children of this command, or hand them to pm2.
    #[arg(long, global = true, value_enum, default_value = "direct")]
    backend: BackendArg,
    /// Log filter for diagnostics on stderr (e.g. "debug"). Defaults to RUST_LOG or "warn".
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Print process output without prefixes.
    #[arg(long, global = true)]
    raw: bool,
    /// Prefix template (e.g. "[{name}]").
    #[arg(long, global = true)]
    prefix: Option<String>,
    /// Pad or truncate prefix to length.
    #[arg(long, global = true)]
    prefix_length: Option<usize>,
    /// Prepend elapsed time to each line.
    #[arg(long, global = true)]
    timestamp: bool,
    /// Keep ANSI colors from process output.
    #[arg(long, global = true)]
    keep_ansi: bool,
    /// Log file template (e.g. "logs/{name}.log").
    #[arg(long, global = true)]
    log_file: Option<String>,
    /// Skip the dependency install step before launching.
    #[arg(long, global = true)]
    no_install: bool,
    /// Install command run before launching.
    #[arg(long, global = true, default_value = "npm install")]
    install_command: String,
    /// Give up on the install step after this many seconds.
    #[arg(long, global = true)]
    install_timeout_secs: Option<u64>,
    /// Refuse to launch a project that still has running processes.
    #[arg(long, global = true)]
    single_instance: bool,
    /// Time to wait for processes to exit after a shutdown signal (ms).
    #[arg(long, global = true, default_value_t = 1500)]
    stop_grace_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List registered projects.
    List,
    /// Register a project.
    Add {
        name: String,
        path: PathBuf,
        /// Launch command; repeat for several. Defaults to "npm start".
        #[arg(long = "command")]
        commands: Vec<String>,
        #[arg(long, value_parser = parse_port)]
        port: Option<u16>,
        /// Extra environment (KEY=VAL); repeatable.
        #[arg(long, value_parser = parse_env_arg)]
        env: Vec<(String, String)>,
    },
    /// Forget a project.
    Remove { name: String },
    /// Run `git pull origin main` in the project directory.
    Update { name: String },
    /// Install dependencies and start the project's launch commands.
    Launch { name: String },
    /// Stop the project's processes.
    Stop { name: String },
    /// Change the port exported as PORT.
    SetPort {
        name: String,
        #[arg(value_parser = parse_port)]
        port: u16,
    },
    /// Set or remove environment variables.
    SetEnv {
        name: String,
        #[arg(value_parser = parse_env_arg)]
        entries: Vec<(String, String)>,
        /// Variable to remove; repeatable.
        #[arg(long)]
        unset: Vec<String>,
    },
    /// Replace the launch commands.
    Configure {
        name: String,
        #[arg(required = true, num_args = 1..)]
        commands: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy)]
enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    fn label(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match &cli.command {
        Commands::List => {
            let store = load_store(&cli.config)?;
            print_projects(&store);
        }
        Commands::Add {
            name,
            path,
            commands,
            port,
            env,
        } => {
            let projects = config::load_or_default(&cli.config)
                .with_context(|| format!("failed to read {}", cli.config.display()))?;
            let mut store = ProjectStore::new(projects);
            let path = std::path::absolute(path)
                .with_context(|| format!("invalid project path {}", path.display()))?;
            let mut project = ProjectRecord::new(path).with_name(name.clone());
            if let Some(port) = port {
                project = project.with_port(*port);
            }
            if !commands.is_empty() {
                project = project.with_commands(commands.clone());
            }
            project.env.extend(env.iter().cloned());
            let display = project.display_name();
            if let Err(err) = store.add(project) {
                cli_error(ErrorKind::ValueValidation, err.to_string());
            }
            save_store(&cli.config, &store)?;
            println!("added {}", display);
        }
        Commands::Remove { name } => {
            let mut store = load_store(&cli.config)?;
            if store.remove(name).is_none() {
                unknown_project(name, &store.names());
            }
            save_store(&cli.config, &store)?;
            println!("removed {}", name);
        }
        Commands::Update { name } => {
            let store = load_store(&cli.config)?;
            let project = require_project(&store, name);
            return update(&cli, project).await;
        }
        Commands::Launch { name } => {
            let store = load_store(&cli.config)?;
            let project = require_project(&store, name).clone();
            return launch(&cli, project).await;
        }
        Commands::Stop { name } => {
            let store = load_store(&cli.config)?;
            let project = require_project(&store, name);
            let (sink, mut rx) = LogSink::channel();
            let mut output = OutputState::new(output_format(&cli));
            let mut supervisor = Supervisor::new(supervisor_options(&cli)?);
            drive(supervisor.stop(project, &sink), &mut rx, &mut output).await?;
            output.flush();
        }
        Commands::SetPort { name, port } => {
            let mut store = load_store(&cli.config)?;
            let known = store.names();
            let Some(project) = store.find_mut(name) else {
                unknown_project(name, &known);
            };
            project.port = *port;
            save_store(&cli.config, &store)?;
            println!("{} now uses port {}", name, port);
        }
        Commands::SetEnv {
            name,
            entries,
            unset,
        } => {
            let mut store = load_store(&cli.config)?;
            let known = store.names();
            let Some(project) = store.find_mut(name) else {
                unknown_project(name, &known);
            };
            apply_env_changes(&mut project.env, entries, unset);
            save_store(&cli.config, &store)?;
            println!("updated environment of {}", name);
        }
        Commands::Configure { name, commands } => {
            let mut store = load_store(&cli.config)?;
            let known = store.names();
            let Some(project) = store.find_mut(name) else {
                unknown_project(name, &known);
            };
            project.launch_commands = commands.clone();
            save_store(&cli.config, &store)?;
            println!("{} launches: {}", name, commands.join(" | "));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn update(cli: &Cli, project: &ProjectRecord) -> Result<ExitCode> {
    let (sink, mut rx) = LogSink::channel();
    let mut output = OutputState::new(output_format(cli));
    let supervisor = Supervisor::new(supervisor_options(cli)?);
    let result = drive(supervisor.update(project, &sink), &mut rx, &mut output).await;
    output.flush();
    let result = result?;
    if result.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Launches `project` and stays in the foreground until its processes exit
/// or a shutdown signal arrives.
async fn launch(cli: &Cli, project: ProjectRecord) -> Result<ExitCode> {
    let name = project.display_name();
    let (sink, mut rx) = LogSink::channel();
    let mut output = OutputState::new(output_format(cli));
    let mut supervisor = Supervisor::new(supervisor_options(cli)?);

    let report = drive(supervisor.launch(&project, &sink), &mut rx, &mut output).await?;
    if supervisor.options().backend == Backend::Pm2 || report.started == 0 {
        output.flush();
        return Ok(ExitCode::SUCCESS);
    }

    info!(project = %name, pids = ?report.pids, "launched");
    let mut shutdown = spawn_signal_listener();
    let mut open_streams = report.started;
    let mut ticker = tokio::time::interval(Duration::from_millis(150));
    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                if matches!(event, Event::Exited { .. }) {
                    open_streams = open_streams.saturating_sub(1);
                }
                print_event(&mut output, &event);
            }
            _ = ticker.tick() => {
                supervisor.reap(&sink);
                if open_streams == 0 && supervisor.total_live() == 0 {
                    break;
                }
            }
            Some(signal) = shutdown.recv() => {
                info!(project = %name, signal = signal.label(), "shutting down");
                sink.notice(&name, format!("received {}, stopping", signal.label()));
                supervisor.stop(&project, &sink).await?;
                wait_for_streams(&mut rx, &mut output, open_streams, cli.stop_grace_ms).await;
                break;
            }
        }
    }

    supervisor.reap(&sink);
    for slot in supervisor.status(&name) {
        sink.notice(&name, format!("{}: {}", slot.command, slot.status.label()));
    }
    supervisor.shutdown_all();
    drain(&mut rx, &mut output);
    output.flush();
    Ok(ExitCode::SUCCESS)
}

// Print events until `open` output streams have closed or the grace period ends.
async fn wait_for_streams(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    output: &mut OutputState,
    mut open: usize,
    grace_ms: u64,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(grace_ms);
    while open > 0 {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) => {
                if matches!(event, Event::Exited { .. }) {
                    open -= 1;
                }
                print_event(output, &event);
            }
            _ => break,
        }
    }
}

/// Polls `fut` to completion while printing sink events as they arrive.
async fn drive<F, T>(
    fut: F,
    rx: &mut mpsc::UnboundedReceiver<Event>,
    output: &mut OutputState,
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(fut);
    let result = loop {
        tokio::select! {
            result = &mut fut => break result,
            Some(event) = rx.recv() => print_event(output, &event),
        }
    };
    drain(rx, output);
    result
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Event>, output: &mut OutputState) {
    while let Ok(event) = rx.try_recv() {
        print_event(output, &event);
    }
}

fn print_event(output: &mut OutputState, event: &Event) {
    let line = output.render(event);
    if writes_to_stderr(event) {
        eprintln!("{}", line);
    } else {
        println!("{}", line);
    }
}

// Child stderr stays on stderr so shell redirection keeps the two apart.
fn writes_to_stderr(event: &Event) -> bool {
    matches!(
        event,
        Event::Alert { .. }
            | Event::Output {
                stream: StreamKind::Stderr,
                ..
            }
    )
}

fn print_projects(store: &ProjectStore) {
    if store.projects.is_empty() {
        println!("no projects registered");
        return;
    }
    for project in &store.projects {
        let env = if project.env.is_empty() {
            String::new()
        } else {
            format!("  env: {}", project.env.keys().cloned().collect::<Vec<_>>().join(","))
        };
        println!(
            "{}\t{}\t{}\t{}{}",
            project.display_name(),
            project.effective_port(),
            project.path.display(),
            project.launch_commands.join(" | "),
            env
        );
    }
}

fn apply_env_changes(
    env: &mut BTreeMap<String, String>,
    entries: &[(String, String)],
    unset: &[String],
) {
    for key in unset {
        env.remove(key);
    }
    env.extend(entries.iter().cloned());
}

fn load_store(path: &Path) -> Result<ProjectStore> {
    let projects = config::load(path).with_context(|| {
        format!(
            "cannot load projects (run `noderack add` to create {})",
            path.display()
        )
    })?;
    Ok(ProjectStore::new(projects))
}

fn save_store(path: &Path, store: &ProjectStore) -> Result<()> {
    config::save(path, &store.projects)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn require_project<'a>(store: &'a ProjectStore, name: &str) -> &'a ProjectRecord {
    match store.find(name) {
        Some(project) => project,
        None => unknown_project(name, &store.names()),
    }
}

fn unknown_project(name: &str, known: &[String]) -> ! {
    let hint = if known.is_empty() {
        "no projects are registered".to_string()
    } else {
        format!("known projects: {}", known.join(", "))
    };
    cli_error(
        ErrorKind::InvalidValue,
        format!("unknown project '{}' ({})", name, hint),
    )
}

fn cli_error(kind: ErrorKind, message: String) -> ! {
    Cli::command().error(kind, message).exit()
}

fn supervisor_options(cli: &Cli) -> Result<SupervisorOptions> {
    let install = if cli.no_install {
        None
    } else {
        CommandSpec::parse(&cli.install_command)
            .with_context(|| format!("invalid install command {:?}", cli.install_command))?
    };
    Ok(SupervisorOptions {
        install,
        install_timeout: cli.install_timeout_secs.map(Duration::from_secs),
        launch_policy: if cli.single_instance {
            LaunchPolicy::RejectWhileRunning
        } else {
            LaunchPolicy::AllowDuplicates
        },
        backend: match cli.backend {
            BackendArg::Direct => Backend::Direct,
            BackendArg::Pm2 => Backend::Pm2,
        },
        ..SupervisorOptions::default()
    })
}

fn output_format(cli: &Cli) -> OutputFormat {
    OutputFormat {
        raw: cli.raw,
        prefix: cli.prefix.clone(),
        prefix_length: cli.prefix_length,
        timestamp: cli.timestamp,
        keep_ansi: cli.keep_ansi,
        log_file: cli.log_file.clone(),
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn spawn_signal_listener() -> mpsc::Receiver<ShutdownSignal> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    let _ = tx.send(ShutdownSignal::Interrupt).await;
                }
                _ = sigterm.recv() => {
                    let _ = tx.send(ShutdownSignal::Terminate).await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx.send(ShutdownSignal::Interrupt).await;
        }
    });
    rx
}

fn parse_port(raw: &str) -> Result<u16, String> {
    let value: u32 = raw
        .parse()
        .map_err(|_| format!("{:?} is not a port number", raw))?;
    validate_port(value).map_err(|err| err.to_string())
}

fn parse_env_arg(raw: &str) -> Result<(String, String), String> {
    parse_env_pair(raw).map_err(|err| err.to_string())
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stderr_lines_and_alerts_go_to_stderr() {
        let output = |stream| Event::Output {
            project: "api".into(),
            line: "boot".into(),
            stream,
        };
        assert!(writes_to_stderr(&output(StreamKind::Stderr)));
        assert!(!writes_to_stderr(&output(StreamKind::Stdout)));
        assert!(writes_to_stderr(&Event::Alert {
            project: "api".into(),
            kind: crate::events::AlertKind::ToolNotFound,
            message: "npm".into(),
        }));
        assert!(!writes_to_stderr(&Event::Notice {
            project: "api".into(),
            message: "stopped".into(),
        }));
    }

    #[test]
    fn add_parses_repeated_commands_port_and_env() {
        let cli = Cli::try_parse_from([
            "noderack",
            "add",
            "shop",
            "/srv/shop",
            "--command",
            "npm run api",
            "--command",
            "npm run worker",
            "--port",
            "4100",
            "--env",
            "NODE_ENV=production",
        ])
        .unwrap();
        match cli.command {
            Commands::Add {
                name,
                commands,
                port,
                env,
                ..
            } => {
                assert_eq!(name, "shop");
                assert_eq!(commands, vec!["npm run api", "npm run worker"]);
                assert_eq!(port, Some(4100));
                assert_eq!(env, vec![("NODE_ENV".to_string(), "production".to_string())]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn out_of_range_port_is_rejected_by_parser() {
        for port in ["0", "65536", "http"] {
            let err = Cli::try_parse_from(["noderack", "set-port", "shop", port]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn configure_requires_at_least_one_command() {
        let err = Cli::try_parse_from(["noderack", "configure", "shop"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn global_options_work_after_subcommand() {
        let cli = Cli::try_parse_from([
            "noderack",
            "launch",
            "shop",
            "--backend",
            "pm2",
            "--no-install",
            "--single-instance",
        ])
        .unwrap();
        let options = supervisor_options(&cli).unwrap();
        assert_eq!(options.backend, Backend::Pm2);
        assert!(options.install.is_none());
        assert_eq!(options.launch_policy, LaunchPolicy::RejectWhileRunning);
    }

    #[test]
    fn install_command_is_split_like_a_shell() {
        let cli = Cli::try_parse_from([
            "noderack",
            "launch",
            "shop",
            "--install-command",
            "npm ci --omit dev",
            "--install-timeout-secs",
            "30",
        ])
        .unwrap();
        let options = supervisor_options(&cli).unwrap();
        let install = options.install.unwrap();
        assert_eq!(install.program, "npm");
        assert_eq!(install.args, vec!["ci", "--omit", "dev"]);
        assert_eq!(options.install_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn env_changes_unset_before_setting() {
        let mut env = BTreeMap::from([
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string()),
        ]);
        apply_env_changes(
            &mut env,
            &[("B".to_string(), "3".to_string())],
            &["A".to_string(), "B".to_string()],
        );
        assert_eq!(env, BTreeMap::from([("B".to_string(), "3".to_string())]));
    }
}
