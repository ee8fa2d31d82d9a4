//! Superuser tier: command execution through an elevated shell.
//!
//! The elevated shell comes from the configured `su` binary. Two strategies
//! are supported: `raw` spawns a fresh shell per command and feeds it the
//! command plus an `exit` line; `session` keeps one shell alive and
//! serializes commands through a job queue (see [`session`]). Availability
//! is probed once by running `id` through the raw path and cached until an
//! explicit re-check.

mod session;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use echelon_common::{CommandPolicy, Settings, SuStrategy};
use session::{Session, SessionJob, SessionReply};
use std::process::Stdio;
use tier_api::{
    exit_code, CommandResult, PermissionStatus, PermissionTier, RunningProcess, ShellExecutor,
    ShellIdentity,
};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

pub struct SuperuserExecutor {
    strategy: SuStrategy,
    su_binary: String,
    policy: CommandPolicy,
    /// Probe result; `None` until the first check or after an explicit
    /// re-check request.
    access: Mutex<Option<bool>>,
    session: Mutex<Option<Session>>,
}

impl SuperuserExecutor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            strategy: settings.superuser.strategy,
            su_binary: settings.superuser.su_binary.clone(),
            policy: settings.command_policy(),
            access: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Probe superuser access once and cache the answer.
    async fn ensure_access(&self) -> bool {
        let mut access = self.access.lock().await;
        if let Some(known) = *access {
            return known;
        }
        let granted = match self.run_raw("id").await {
            Ok((stdout, _, _)) => stdout.contains("uid=0"),
            Err(err) => {
                debug!(target: "tier_super", error = %format!("{err:#}"), "superuser probe failed");
                false
            }
        };
        debug!(target: "tier_super", granted, "superuser access probed");
        *access = Some(granted);
        granted
    }

    /// Fresh elevated shell fed the command line and an `exit`, both
    /// streams read to completion.
    async fn run_raw(&self, line: &str) -> Result<SessionReply> {
        let mut child = Command::new(&self.su_binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to create process: {}", self.su_binary))?;

        let mut stdin = child.stdin.take().context("elevated shell has no stdin")?;
        stdin
            .write_all(format!("{line}\nexit\n").as_bytes())
            .await
            .context("Failed to write to elevated shell")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("Failed to read elevated shell output")?;
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code(output.status),
        ))
    }

    /// Run one job through the long-lived session, starting or restarting
    /// it as needed.
    async fn run_session(&self, line: &str) -> Result<SessionReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(SessionJob {
            line: line.to_string(),
            reply: Some(reply_tx),
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| anyhow!("Elevated session ended before the command completed"))
    }

    async fn enqueue(&self, job: SessionJob) -> Result<()> {
        let mut guard = self.session.lock().await;
        let job = match guard.as_ref() {
            Some(session) => match session.submit(job).await {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    // Driver gone (shell died); replace the session once.
                    debug!(target: "tier_super", "elevated session is gone, restarting");
                    returned
                }
            },
            None => job,
        };

        let session = Session::start(&self.su_binary)?;
        let accepted = session.submit(job).await.is_ok();
        *guard = Some(session);
        if accepted {
            Ok(())
        } else {
            Err(anyhow!("Elevated session ended immediately"))
        }
    }

    async fn dispatch_background(&self, line: String) {
        match self.strategy {
            SuStrategy::Session => {
                if let Err(err) = self.enqueue(SessionJob { line, reply: None }).await {
                    warn!(target: "tier_super", error = %format!("{err:#}"), "failed to enqueue background command");
                }
            }
            SuStrategy::Raw => {
                let su_binary = self.su_binary.clone();
                tokio::spawn(async move {
                    if let Err(err) = raw_background(&su_binary, &line).await {
                        warn!(target: "tier_super", error = %format!("{err:#}"), "background command failed to start");
                    }
                });
            }
        }
    }

    /// Command line with the staged launcher prepended for the `Shell`
    /// identity. A line with shell operators goes through one `sh -c`
    /// under the launcher; the elevated shell would otherwise split the
    /// line at the first operator and run the tail unwrapped. Staging
    /// failure is the one error surfaced before any process exists.
    async fn wrapped_line(&self, command: &str, identity: ShellIdentity) -> Result<String> {
        if !identity.wraps_launcher() {
            return Ok(command.to_string());
        }
        let launcher = tokio::task::spawn_blocking(echelon_launcher::ensure_staged)
            .await
            .map_err(|err| anyhow!("launcher staging task failed: {err}"))?
            .context("Failed to stage launcher")?;
        if echelon_cmdline::has_operators(command) {
            let quoted = command.replace('\'', r"'\''");
            Ok(format!("'{}' sh -c '{quoted}'", launcher.display()))
        } else {
            Ok(format!("'{}' {}", launcher.display(), command))
        }
    }
}

#[async_trait]
impl ShellExecutor for SuperuserExecutor {
    fn tier(&self) -> PermissionTier {
        PermissionTier::Superuser
    }

    async fn is_available(&self) -> bool {
        self.ensure_access().await
    }

    async fn permission_status(&self) -> PermissionStatus {
        if self.ensure_access().await {
            PermissionStatus::granted_with("Superuser access verified")
        } else {
            PermissionStatus::denied_with("Superuser access not available")
        }
    }

    async fn request_permission(&self) -> PermissionStatus {
        *self.access.lock().await = None;
        self.permission_status().await
    }

    async fn execute(&self, command: &str, identity: ShellIdentity) -> Result<CommandResult> {
        let background = echelon_cmdline::is_background(command);
        let effective = if background {
            echelon_cmdline::strip_background(command)
        } else {
            command
        };
        if effective.trim().is_empty() {
            return Ok(CommandResult::failed("Empty command"));
        }

        let line = self.wrapped_line(effective, identity).await?;

        if background {
            self.dispatch_background(line).await;
            return Ok(CommandResult::background());
        }

        let outcome = match self.strategy {
            SuStrategy::Raw => self.run_raw(&line).await,
            SuStrategy::Session => self.run_session(&line).await,
        };
        Ok(match outcome {
            Ok((stdout, stderr, code)) => CommandResult::new(
                self.policy.success_for(effective, code),
                stdout,
                stderr,
                code,
            ),
            Err(err) => CommandResult::failed(format!("{err:#}")),
        })
    }

    async fn start_process(&self, command: &str) -> Result<RunningProcess> {
        if command.trim().is_empty() {
            return Err(anyhow!("Empty command"));
        }
        let mut child = Command::new(&self.su_binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to create process: {}", self.su_binary))?;

        let mut stdin = child.stdin.take().context("elevated shell has no stdin")?;
        stdin
            .write_all(format!("{command}\nexit\n").as_bytes())
            .await
            .context("Failed to write to elevated shell")?;
        drop(stdin);

        Ok(RunningProcess::from_child(child))
    }
}

/// Fire-and-forget raw shell: write the command, leave the child running.
async fn raw_background(su_binary: &str, line: &str) -> Result<()> {
    let mut child = Command::new(su_binary)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to create process: {su_binary}"))?;

    let mut stdin = child.stdin.take().context("elevated shell has no stdin")?;
    stdin
        .write_all(format!("{line}\nexit\n").as_bytes())
        .await
        .context("Failed to write to elevated shell")?;
    Ok(())
}
