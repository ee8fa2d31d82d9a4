//! Standard-tier backend: commands run directly as the calling user.
//!
//! This is the only tier with an implicit wall-clock timeout on one-shot
//! commands. Interactive processes started through `start_process` are
//! never timed.

use anyhow::Result;
use async_trait::async_trait;
use echelon_common::{redact_command, CommandPolicy, Settings};
use std::process::Stdio;
use std::time::Duration;
use tier_api::{
    exit_code, CommandResult, ExecError, PermissionStatus, PermissionTier, RunningProcess,
    ShellExecutor, ShellIdentity,
};
use tokio::process::Command;
use tracing::{debug, warn};

pub struct LocalExecutor {
    timeout: Duration,
    policy: CommandPolicy,
}

impl LocalExecutor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.execution.timeout_secs),
            policy: settings.command_policy(),
        }
    }

    /// Plain commands spawn their argv directly; anything with shell
    /// grammar goes through `sh -c`.
    fn build_command(command: &str) -> Option<Command> {
        if echelon_cmdline::has_operators(command) {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            return Some(cmd);
        }

        let tokens = echelon_cmdline::tokenize(command).tokens;
        let (program, args) = tokens.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Some(cmd)
    }

    fn spawn_background(&self, command: &str) -> CommandResult {
        let Some(mut cmd) = Self::build_command(command) else {
            return CommandResult::failed("Empty command");
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match cmd.spawn() {
            Ok(child) => {
                debug!(target: "tier_local", pid = child.id(), "spawned background command");
                CommandResult::background()
            }
            Err(err) => {
                CommandResult::failed(ExecError::ProcessCreation(err.to_string()).to_string())
            }
        }
    }
}

#[async_trait]
impl ShellExecutor for LocalExecutor {
    fn tier(&self) -> PermissionTier {
        PermissionTier::Standard
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn permission_status(&self) -> PermissionStatus {
        PermissionStatus::granted()
    }

    async fn execute(&self, command: &str, identity: ShellIdentity) -> Result<CommandResult> {
        if identity != ShellIdentity::Default {
            debug!(target: "tier_local", ?identity, "identity ignored by the standard tier");
        }

        // Fire-and-forget: a trailing & means the caller will not wait.
        if echelon_cmdline::is_background(command) {
            return Ok(self.spawn_background(echelon_cmdline::strip_background(command)));
        }

        let Some(mut cmd) = Self::build_command(command) else {
            return Ok(CommandResult::failed("Empty command"));
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return Ok(CommandResult::failed(
                    ExecError::ProcessCreation(err.to_string()).to_string(),
                ))
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let code = exit_code(output.status);
                Ok(CommandResult::new(
                    self.policy.success_for(command, code),
                    String::from_utf8_lossy(&output.stdout).into_owned(),
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                    code,
                ))
            }
            Ok(Err(err)) => Ok(CommandResult::failed(format!(
                "Failed to read process output: {err}"
            ))),
            Err(_) => {
                // Dropping the timed-out wait kills the child (kill_on_drop).
                warn!(
                    target: "tier_local",
                    command = %redact_command(command),
                    timeout_secs = self.timeout.as_secs(),
                    "command timed out"
                );
                Ok(CommandResult::failed(
                    ExecError::Timeout(self.timeout.as_secs()).to_string(),
                ))
            }
        }
    }

    async fn start_process(&self, command: &str) -> Result<RunningProcess> {
        let mut cmd =
            Self::build_command(command).ok_or_else(|| anyhow::anyhow!("Empty command"))?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|err| anyhow::Error::new(ExecError::ProcessCreation(err.to_string())))?;

        Ok(RunningProcess::from_child(child))
    }
}
