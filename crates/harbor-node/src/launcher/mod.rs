mod command;
mod os;

use std::collections::BTreeMap;

pub(crate) use command::{build_worker_command, WorkerCommandContext};
pub use command::WORKER_DYNAMIC_OPTION_PLACEHOLDER;
pub use os::OsProcessLauncher;

use crate::error::NodeResult;
use crate::id::StartupToken;

/// A reference to a launched worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pid)
    }
}

pub type ProcessEnvironment = BTreeMap<String, String>;

/// Spawns worker processes. The launcher must not wait for the child
/// beyond the spawn itself. The startup token is assigned by the pool and
/// passed through so that launchers can associate it with the process
/// (test launchers record the pair instead of spawning).
pub trait ProcessLauncher: Send + Sync {
    fn launch(
        &self,
        command: &[String],
        env: &ProcessEnvironment,
        startup_token: StartupToken,
    ) -> NodeResult<ProcessHandle>;
}
