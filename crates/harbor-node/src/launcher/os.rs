use std::process::{Command, Stdio};

use log::info;

use crate::error::{NodeError, NodeResult};
use crate::id::StartupToken;
use crate::launcher::{ProcessEnvironment, ProcessHandle, ProcessLauncher};

/// Launches worker processes as children of the node process.
#[derive(Debug, Default)]
pub struct OsProcessLauncher;

impl OsProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for OsProcessLauncher {
    fn launch(
        &self,
        command: &[String],
        env: &ProcessEnvironment,
        startup_token: StartupToken,
    ) -> NodeResult<ProcessHandle> {
        let Some((program, args)) = command.split_first() else {
            return Err(NodeError::invalid("the worker command is empty"));
        };
        let child = Command::new(program)
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .spawn()?;
        let handle = ProcessHandle::new(child.id());
        info!("spawned worker process {handle} with startup token {startup_token}");
        Ok(handle)
    }
}
