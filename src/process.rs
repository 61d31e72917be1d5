//! Data structures for tracking launched processes.
//!
//! A `ManagedProcess` is one launch-command slot of a project. Slots move
//! `Unstarted -> Running -> Exited` and never back; a new launch creates
//! new slots.

use tokio::process::Child;

/// The current lifecycle status of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Slot created but nothing spawned yet.
    Unstarted,
    /// Process is running.
    Running { pid: Option<u32> },
    /// Process has exited or was signalled. `code` is `None` when unknown.
    Exited { code: Option<i32> },
}

impl ProcessStatus {
    pub fn label(&self) -> String {
        match self {
            ProcessStatus::Unstarted => "unstarted".to_string(),
            ProcessStatus::Running { pid: Some(pid) } => format!("running (pid {})", pid),
            ProcessStatus::Running { pid: None } => "running".to_string(),
            ProcessStatus::Exited { code: Some(code) } => format!("exited ({})", code),
            ProcessStatus::Exited { code: None } => "exited".to_string(),
        }
    }
}

/// A child process owned by exactly one project's supervisor entry.
#[derive(Debug)]
pub struct ManagedProcess {
    /// The shell command string this process was started from.
    pub command: String,
    pub status: ProcessStatus,
    pub(crate) child: Option<Child>,
    exit_reported: bool,
}

impl ManagedProcess {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            status: ProcessStatus::Unstarted,
            child: None,
            exit_reported: false,
        }
    }

    pub(crate) fn attach(&mut self, child: Child) {
        self.status = ProcessStatus::Running { pid: child.id() };
        self.child = Some(child);
    }

    pub fn pid(&self) -> Option<u32> {
        match self.status {
            ProcessStatus::Running { pid } => pid,
            _ => None,
        }
    }

    /// Checks the OS handle without blocking and records a natural exit.
    ///
    /// Returns `true` while the process is still running.
    pub fn refresh(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.status = ProcessStatus::Exited {
                    code: status.code(),
                };
                self.child = None;
                false
            }
            Err(_) => {
                self.status = ProcessStatus::Exited { code: None };
                self.child = None;
                false
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.refresh()
    }

    /// Hands out the exit code once, no matter which call first saw the exit.
    pub(crate) fn take_unreported_exit(&mut self) -> Option<Option<i32>> {
        self.refresh();
        match self.status {
            ProcessStatus::Exited { code } if !self.exit_reported => {
                self.exit_reported = true;
                Some(code)
            }
            _ => None,
        }
    }

    /// Releases the handle after a termination signal. No wait is performed.
    pub(crate) fn release(&mut self) {
        self.child = None;
        self.status = ProcessStatus::Exited { code: None };
        self.exit_reported = true;
    }
}

/// A snapshot of one slot for status listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatus {
    pub command: String,
    pub status: ProcessStatus,
}
