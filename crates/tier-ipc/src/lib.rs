//! Privileged tier: delegation to the out-of-process command broker.
//!
//! The broker daemon owns the actual privilege; this executor only talks
//! to it. Connections are cached per daemon credential and probed before
//! every use, so a restarted daemon is picked up transparently. Shell
//! commands requesting the `Shell` identity are routed through the staged
//! launcher so they never run with the daemon's own identity.

mod cache;

pub use cache::ConnectionCache;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use broker_api::{decode_payload, BrokerError, SpawnSpec, StreamEvent};
use broker_client::{service_credential, BrokerClient, RemoteProcess};
use echelon_common::{CommandPolicy, Settings};
use std::sync::Arc;
use tier_api::{
    CommandResult, PermissionStatus, PermissionTier, ProcessChannels, RunningProcess,
    ShellExecutor, ShellIdentity,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHANNEL_DEPTH: usize = 64;

pub struct PrivilegedExecutor {
    cache: ConnectionCache,
    policy: CommandPolicy,
}

impl PrivilegedExecutor {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            cache: ConnectionCache::new(settings.broker_socket()?),
            policy: settings.command_policy(),
        })
    }

    /// Argv with the launcher prepended when the identity asks for it.
    /// Staging is the one failure that surfaces as an error, before any
    /// process exists.
    async fn wrapped_argv(
        &self,
        command: &str,
        identity: ShellIdentity,
    ) -> Result<Option<Vec<String>>> {
        let Some(mut argv) = base_argv(command) else {
            return Ok(None);
        };

        if identity.wraps_launcher() {
            let launcher = tokio::task::spawn_blocking(echelon_launcher::ensure_staged)
                .await
                .map_err(|err| anyhow!("launcher staging task failed: {err}"))?
                .context("Failed to stage launcher")?;
            argv.insert(0, launcher.display().to_string());
        }

        Ok(Some(argv))
    }
}

#[async_trait]
impl ShellExecutor for PrivilegedExecutor {
    fn tier(&self) -> PermissionTier {
        PermissionTier::Privileged
    }

    async fn initialize(&self) -> Result<()> {
        let launcher = tokio::task::spawn_blocking(echelon_launcher::ensure_staged)
            .await
            .map_err(|err| anyhow!("launcher staging task failed: {err}"))?
            .context("Failed to stage launcher")?;
        debug!(target: "tier_ipc", launcher = %launcher.display(), "initialized");
        Ok(())
    }

    async fn is_available(&self) -> bool {
        service_credential(self.cache.socket_path()).is_ok()
    }

    async fn permission_status(&self) -> PermissionStatus {
        match self.cache.client().await {
            Ok(client) => PermissionStatus::granted_with(format!(
                "Privileged service connected (uid {})",
                client.uid()
            )),
            Err(err) => PermissionStatus::denied_with(unreachable_reason(&err)),
        }
    }

    async fn execute(&self, command: &str, identity: ShellIdentity) -> Result<CommandResult> {
        let background = echelon_cmdline::is_background(command);
        let effective = if background {
            echelon_cmdline::strip_background(command)
        } else {
            command
        };

        let Some(argv) = self.wrapped_argv(effective, identity).await? else {
            return Ok(CommandResult::failed("Empty command"));
        };

        let client = match self.cache.client().await {
            Ok(client) => client,
            Err(err) => return Ok(CommandResult::failed(unreachable_reason(&err))),
        };

        if background {
            // The daemon closes the child's stdio; nothing to wait for.
            return Ok(match client.spawn(SpawnSpec::detached(argv)).await {
                Ok(id) => {
                    debug!(target: "tier_ipc", id = %id, "spawned detached process");
                    CommandResult::background()
                }
                Err(err) => spawn_failure(err),
            });
        }

        let id = match client.spawn(SpawnSpec::new(argv)).await {
            Ok(id) => id,
            Err(err) => return Ok(spawn_failure(err)),
        };
        let mut process = match client.attach(&id).await {
            Ok(process) => process,
            Err(err) => {
                return Ok(CommandResult::failed(format!(
                    "Failed to attach to process {id}: {err}"
                )))
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        loop {
            match process.next_event().await {
                Ok(StreamEvent::Stdout { data_b64 }) => match decode_payload(&data_b64) {
                    Ok(bytes) => stdout.extend_from_slice(&bytes),
                    Err(err) => {
                        return Ok(CommandResult::failed(format!(
                            "Malformed process output: {err}"
                        )))
                    }
                },
                Ok(StreamEvent::Stderr { data_b64 }) => match decode_payload(&data_b64) {
                    Ok(bytes) => stderr.extend_from_slice(&bytes),
                    Err(err) => {
                        return Ok(CommandResult::failed(format!(
                            "Malformed process output: {err}"
                        )))
                    }
                },
                Ok(StreamEvent::Exited { code }) => {
                    return Ok(CommandResult::new(
                        self.policy.success_for(effective, code),
                        String::from_utf8_lossy(&stdout).into_owned(),
                        String::from_utf8_lossy(&stderr).into_owned(),
                        code,
                    ));
                }
                // next_event reports broker-side errors as Err; this arm
                // only completes the match.
                Ok(StreamEvent::Error { message }) => return Ok(CommandResult::failed(message)),
                Err(err) => {
                    return Ok(CommandResult::failed(format!(
                        "Process stream failed: {err}"
                    )))
                }
            }
        }
    }

    async fn start_process(&self, command: &str) -> Result<RunningProcess> {
        let argv = base_argv(command).ok_or_else(|| anyhow!("Empty command"))?;
        let client = self
            .cache
            .client()
            .await
            .map_err(|err| anyhow!(unreachable_reason(&err)))?;
        let id = client
            .spawn(SpawnSpec::new(argv))
            .await
            .map_err(|err| anyhow!("Failed to create process: {err}"))?;
        let process = client
            .attach(&id)
            .await
            .map_err(|err| anyhow!("Failed to attach to process {id}: {err}"))?;

        Ok(remote_running_process(id, process, client))
    }
}

/// Spawn shape shared with the other tiers: plain argv, or `sh -c` once
/// shell grammar is involved.
fn base_argv(command: &str) -> Option<Vec<String>> {
    if echelon_cmdline::has_operators(command) {
        return Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]);
    }

    let tokens = echelon_cmdline::tokenize(command).tokens;
    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

fn unreachable_reason(err: &BrokerError) -> String {
    format!("Privileged service unavailable: {err}")
}

fn spawn_failure(err: BrokerError) -> CommandResult {
    let reason = match err {
        BrokerError::Service(message) if message.starts_with("Failed to create process") => message,
        other => format!("Failed to create process: {other}"),
    };
    CommandResult::failed(reason)
}

/// Bridge a broker-side process into a [`RunningProcess`].
///
/// One task drains stream events into the output channels and publishes
/// the exit code; a second one waits for destruction and turns it into
/// the kill RPC, after which the stream still drains to its exit event.
fn remote_running_process(
    id: String,
    mut process: RemoteProcess,
    client: Arc<BrokerClient>,
) -> RunningProcess {
    let (stdout_tx, stdout_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (stderr_tx, stderr_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (exit_tx, exit_rx) = watch::channel(None);
    let cancel = CancellationToken::new();

    let kill_cancel = cancel.clone();
    let kill_id = id.clone();
    let mut kill_exit = exit_rx.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = kill_cancel.cancelled() => {
                if let Err(err) = client.kill(&kill_id).await {
                    // Already gone; the stream ends on its own.
                    debug!(target: "tier_ipc", id = %kill_id, error = %err, "kill after destroy");
                }
            }
            _ = async {
                let _ = kill_exit.wait_for(|code| code.is_some()).await;
            } => {}
        }
    });

    let pump_id = id.clone();
    tokio::spawn(async move {
        let code = loop {
            match process.next_event().await {
                Ok(StreamEvent::Stdout { data_b64 }) => forward(&stdout_tx, &data_b64).await,
                Ok(StreamEvent::Stderr { data_b64 }) => forward(&stderr_tx, &data_b64).await,
                Ok(StreamEvent::Exited { code }) => break code,
                Ok(StreamEvent::Error { message }) => {
                    warn!(target: "tier_ipc", id = %pump_id, message = %message, "stream reported an error");
                    break -1;
                }
                Err(err) => {
                    warn!(target: "tier_ipc", id = %pump_id, error = %err, "stream ended without an exit event");
                    break -1;
                }
            }
        };
        debug!(target: "tier_ipc", id = %pump_id, exit = code, "remote process finished");
        let _ = exit_tx.send(Some(code));
    });

    RunningProcess::from_channels(ProcessChannels {
        id,
        stdout: stdout_rx,
        stderr: stderr_rx,
        exit: exit_rx,
        cancel,
    })
}

/// Decode one payload chunk and forward it. A consumer that dropped its
/// stream stops receiving; the drain continues toward the exit event.
async fn forward(tx: &mpsc::Sender<Vec<u8>>, data_b64: &str) {
    match decode_payload(data_b64) {
        Ok(bytes) => {
            let _ = tx.send(bytes).await;
        }
        Err(err) => {
            warn!(target: "tier_ipc", error = %err, "dropping malformed payload");
        }
    }
}
